// REST client for the tournament backend.
//
// Stores only ever ask for "the full current snapshot of slice X for id N".
// `BackendApi` is that contract; `ApiClient` implements it over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use radiant_core::config::ApiConfig;
use radiant_core::model::{Draft, DraftEvent, Game, HeroDraft, Team, TournamentMeta, UserPayload};
use radiant_core::Pk;
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Snapshot fetches the stores depend on.
#[async_trait]
pub trait BackendApi: Send + Sync + 'static {
    async fn fetch_tournament(&self, id: Pk) -> Result<TournamentMeta, ApiError>;
    async fn fetch_tournament_users(&self, id: Pk) -> Result<Vec<UserPayload>, ApiError>;
    async fn fetch_teams(&self, tournament_id: Pk) -> Result<Vec<Team>, ApiError>;
    async fn fetch_games(&self, tournament_id: Pk) -> Result<Vec<Game>, ApiError>;
    async fn fetch_draft(&self, id: Pk) -> Result<Draft, ApiError>;
    async fn fetch_draft_events(&self, id: Pk) -> Result<Vec<DraftEvent>, ApiError>;
    async fn fetch_hero_draft(&self, id: Pk) -> Result<HeroDraft, ApiError>;
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        Self::new(config.base_url.clone(), config.timeout())
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!(%url, "GET");

        let resp = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}

#[async_trait]
impl BackendApi for ApiClient {
    async fn fetch_tournament(&self, id: Pk) -> Result<TournamentMeta, ApiError> {
        self.get_json(&format!("/api/tournaments/{id}/")).await
    }

    async fn fetch_tournament_users(&self, id: Pk) -> Result<Vec<UserPayload>, ApiError> {
        self.get_json(&format!("/api/tournaments/{id}/users/")).await
    }

    async fn fetch_teams(&self, tournament_id: Pk) -> Result<Vec<Team>, ApiError> {
        self.get_json(&format!("/api/tournaments/{tournament_id}/teams/"))
            .await
    }

    async fn fetch_games(&self, tournament_id: Pk) -> Result<Vec<Game>, ApiError> {
        self.get_json(&format!("/api/tournaments/{tournament_id}/games/"))
            .await
    }

    async fn fetch_draft(&self, id: Pk) -> Result<Draft, ApiError> {
        self.get_json(&format!("/api/drafts/{id}/")).await
    }

    async fn fetch_draft_events(&self, id: Pk) -> Result<Vec<DraftEvent>, ApiError> {
        self.get_json(&format!("/api/drafts/{id}/events/")).await
    }

    async fn fetch_hero_draft(&self, id: Pk) -> Result<HeroDraft, ApiError> {
        self.get_json(&format!("/api/herodraft/{id}/")).await
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
