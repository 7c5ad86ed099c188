// Shared fixtures for store unit tests.

use async_trait::async_trait;
use radiant_core::model::{Draft, DraftEvent, Game, HeroDraft, Team, TournamentMeta, UserPayload};
use radiant_core::Pk;

use crate::api::{ApiError, BackendApi};

pub(crate) const BASE: &str = "ws://test";

/// Backend that is never reachable. Unit tests feed fetch results to the
/// store by hand, so anything the store spawns just fails quietly.
pub(crate) struct NoApi;

fn offline<T>() -> Result<T, ApiError> {
    Err(ApiError::Network("offline".into()))
}

#[async_trait]
impl BackendApi for NoApi {
    async fn fetch_tournament(&self, _id: Pk) -> Result<TournamentMeta, ApiError> {
        offline()
    }

    async fn fetch_tournament_users(&self, _id: Pk) -> Result<Vec<UserPayload>, ApiError> {
        offline()
    }

    async fn fetch_teams(&self, _tournament_id: Pk) -> Result<Vec<Team>, ApiError> {
        offline()
    }

    async fn fetch_games(&self, _tournament_id: Pk) -> Result<Vec<Game>, ApiError> {
        offline()
    }

    async fn fetch_draft(&self, _id: Pk) -> Result<Draft, ApiError> {
        offline()
    }

    async fn fetch_draft_events(&self, _id: Pk) -> Result<Vec<DraftEvent>, ApiError> {
        offline()
    }

    async fn fetch_hero_draft(&self, _id: Pk) -> Result<HeroDraft, ApiError> {
        offline()
    }
}
