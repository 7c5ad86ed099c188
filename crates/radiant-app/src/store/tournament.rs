// Tournament store: metadata, roster, teams and bracket for one tournament.
//
// Users are not kept here. They go into the shared user cache under the
// tournament's org/league scope, and the store remembers which pks belong to
// the tournament. Users that arrive before the metadata are held back until
// that scope is known.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};

use radiant_core::model::{Game, GameStatus, Team, TournamentEvent, TournamentMeta, UserPayload};
use radiant_core::protocol::{self, Channel, Inbound, SequenceTracker, TournamentMessage};
use radiant_core::{CacheContext, EntityAdapter, EntityState, Pk, SharedUserCache, UserEntry};
use radiant_ws::{ChannelEvent, ConnectionManager, ConnectionState};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    judge_fetch, observe_sequence, FetchVerdict, Fetched, Link, LinkEvent, Slice, SliceStatus,
    SliceStatuses, StoreUpdate,
};
use crate::api::{ApiError, BackendApi};

const STORE: &str = "tournament";

/// One HTTP result for a tournament slice.
#[derive(Debug)]
pub enum TournamentFetch {
    Metadata(Result<TournamentMeta, ApiError>),
    Users(Result<Vec<UserPayload>, ApiError>),
    Teams(Result<Vec<Team>, ApiError>),
    Games(Result<Vec<Game>, ApiError>),
}

impl TournamentFetch {
    fn slice(&self) -> Slice {
        match self {
            TournamentFetch::Metadata(_) => Slice::Metadata,
            TournamentFetch::Users(_) => Slice::Users,
            TournamentFetch::Teams(_) => Slice::Teams,
            TournamentFetch::Games(_) => Slice::Games,
        }
    }
}

pub struct TournamentStore {
    api: Arc<dyn BackendApi>,
    user_cache: SharedUserCache,
    link: Link<TournamentFetch>,
    team_adapter: EntityAdapter<Team>,
    game_adapter: EntityAdapter<Game>,

    tracked_id: Option<Pk>,
    epoch: u64,
    metadata: Option<TournamentMeta>,
    user_ids: Vec<Pk>,
    /// Users seen before the metadata; cached once the scope is known.
    pending_users: Vec<UserPayload>,
    teams: EntityState<Team>,
    games: EntityState<Game>,
    events: BTreeMap<Pk, TournamentEvent>,
    statuses: SliceStatuses,
    connection: ConnectionState,
    sequence: SequenceTracker,
}

impl TournamentStore {
    pub fn new(
        api: Arc<dyn BackendApi>,
        manager: ConnectionManager,
        user_cache: SharedUserCache,
    ) -> Self {
        let team_adapter = EntityAdapter::new();
        let game_adapter = EntityAdapter::new();
        let teams = team_adapter.initial_state();
        let games = game_adapter.initial_state();
        Self {
            api,
            user_cache,
            link: Link::new(manager),
            team_adapter,
            game_adapter,
            tracked_id: None,
            epoch: 0,
            metadata: None,
            user_ids: Vec::new(),
            pending_users: Vec::new(),
            teams,
            games,
            events: BTreeMap::new(),
            statuses: SliceStatuses::default(),
            connection: ConnectionState::Disconnected,
            sequence: SequenceTracker::new(),
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Track tournament `id` (or nothing). A change drops the old channel,
    /// clears every slice, and for a new id subscribes and starts `load_all`.
    /// Returns `false` when `id` is already tracked.
    pub fn set_tracked_id(&mut self, id: Option<Pk>) -> bool {
        if self.tracked_id == id {
            return false;
        }
        self.clear();
        self.tracked_id = id;
        if let Some(id) = id {
            info!(tournament_id = id, "Tracking tournament");
            self.link.connect(Channel::tournament(id));
            self.load_all();
        }
        true
    }

    /// Stop tracking: unsubscribe and clear all slices.
    pub fn reset(&mut self) {
        self.clear();
        self.tracked_id = None;
    }

    fn clear(&mut self) {
        self.link.disconnect();
        self.epoch += 1;
        self.metadata = None;
        self.user_ids.clear();
        self.pending_users.clear();
        self.teams = self.team_adapter.initial_state();
        self.games = self.game_adapter.initial_state();
        self.events.clear();
        self.statuses.clear();
        self.connection = ConnectionState::Disconnected;
        self.sequence.reset();
    }

    // -- loaders ------------------------------------------------------------

    pub fn load_metadata(&mut self) {
        self.spawn_load(&[Slice::Metadata], |api, id, sink| async move {
            sink.send(TournamentFetch::Metadata(api.fetch_tournament(id).await));
        });
    }

    pub fn load_users(&mut self) {
        self.spawn_load(&[Slice::Users], |api, id, sink| async move {
            sink.send(TournamentFetch::Users(api.fetch_tournament_users(id).await));
        });
    }

    pub fn load_teams(&mut self) {
        self.spawn_load(&[Slice::Teams], |api, id, sink| async move {
            sink.send(TournamentFetch::Teams(api.fetch_teams(id).await));
        });
    }

    pub fn load_games(&mut self) {
        self.spawn_load(&[Slice::Games], |api, id, sink| async move {
            sink.send(TournamentFetch::Games(api.fetch_games(id).await));
        });
    }

    /// Metadata first, then users and teams together, then the bracket.
    pub fn load_all(&mut self) {
        let slices = [Slice::Metadata, Slice::Users, Slice::Teams, Slice::Games];
        self.spawn_load(&slices, |api, id, sink| async move {
            sink.send(TournamentFetch::Metadata(api.fetch_tournament(id).await));
            let (users, teams) = tokio::join!(api.fetch_tournament_users(id), api.fetch_teams(id));
            sink.send(TournamentFetch::Users(users));
            sink.send(TournamentFetch::Teams(teams));
            sink.send(TournamentFetch::Games(api.fetch_games(id).await));
        });
    }

    fn spawn_load<F, Fut>(&mut self, slices: &[Slice], job: F)
    where
        F: FnOnce(Arc<dyn BackendApi>, Pk, super::FetchSink<TournamentFetch>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let Some(id) = self.tracked_id else {
            warn!("Tournament load requested with no tracked id");
            return;
        };
        for slice in slices {
            self.statuses.start(*slice);
        }
        let api = Arc::clone(&self.api);
        self.link
            .spawn(id, self.epoch, self.sequence.last(), move |sink| job(api, id, sink));
    }

    // -- event intake -------------------------------------------------------

    /// Wait for the next push frame, connection change or fetch result and
    /// apply it. `None` when no tournament is tracked.
    pub async fn next_update(&mut self) -> Option<StoreUpdate> {
        let event = self.link.next().await?;
        Some(match event {
            LinkEvent::Channel(ChannelEvent::State(state)) => {
                self.connection = state.clone();
                StoreUpdate::Connection(state)
            }
            LinkEvent::Channel(ChannelEvent::Message(frame)) => self.update_from_websocket(&frame),
            LinkEvent::Fetched(fetched) => self.apply_fetch(fetched),
        })
    }

    /// Validate and merge one push frame.
    pub fn update_from_websocket(&mut self, frame: &Value) -> StoreUpdate {
        let inbound: Inbound<TournamentMessage> = match protocol::decode(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(tournament_id = ?self.tracked_id, error = %e, "Rejected tournament frame");
                return StoreUpdate::Rejected(e.to_string());
            }
        };
        observe_sequence(&mut self.sequence, STORE, self.tracked_id, inbound.sequence);

        let kind = match inbound.message {
            TournamentMessage::InitialEvents { events } => {
                debug!(count = events.len(), "Received tournament event history");
                for event in events {
                    self.events.insert(event.pk, event);
                }
                "initial_events"
            }
            TournamentMessage::TournamentEvent { event } => {
                self.merge_event(&event);
                self.events.insert(event.pk, event);
                "tournament_event"
            }
        };
        StoreUpdate::Pushed {
            kind,
            sequence: inbound.sequence,
        }
    }

    fn merge_event(&mut self, event: &TournamentEvent) {
        debug!(event_type = %event.event_type, pk = event.pk, "Merging tournament event");
        if let Some(meta) = &event.tournament {
            self.set_metadata(meta.clone());
            self.statuses.loaded(Slice::Metadata);
        }
        if !event.users.is_empty() {
            self.store_users(event.users.iter().cloned(), false);
        }
        if !event.teams.is_empty() || !event.removed_teams.is_empty() {
            let teams = self.team_adapter.upsert_many(&self.teams, event.teams.iter().cloned());
            self.teams = self
                .team_adapter
                .remove_many(&teams, event.removed_teams.iter().copied());
            self.statuses.loaded(Slice::Teams);
        }
        if !event.games.is_empty() {
            self.games = self.game_adapter.upsert_many(&self.games, event.games.iter().cloned());
            self.statuses.loaded(Slice::Games);
        }
    }

    /// Apply one HTTP result, unless it is for an abandoned id or a push has
    /// already written newer data into its slice.
    pub fn apply_fetch(&mut self, fetched: Fetched<TournamentFetch>) -> StoreUpdate {
        let slice = fetched.payload.slice();
        match judge_fetch(&fetched, self.epoch, &self.sequence, &self.statuses, slice) {
            FetchVerdict::Discard => {
                debug!(tournament_id = fetched.tracked_id, %slice, "Discarding fetch for abandoned tournament");
                return StoreUpdate::Discarded(slice);
            }
            FetchVerdict::SkipStale => {
                info!(
                    tournament_id = fetched.tracked_id,
                    %slice,
                    requested_at = fetched.sequence_at_request,
                    last_sequence = self.sequence.last(),
                    "Skipping HTTP result older than pushed state"
                );
                self.statuses.settled(slice);
                return StoreUpdate::StaleHttpSkipped(slice);
            }
            FetchVerdict::Apply => {}
        }

        let result = match fetched.payload {
            TournamentFetch::Metadata(result) => result.map(|meta| self.set_metadata(meta)),
            TournamentFetch::Users(result) => result.map(|users| self.store_users(users, true)),
            TournamentFetch::Teams(result) => result.map(|teams| {
                // Full snapshot: drop teams the server no longer lists.
                let gone: Vec<Pk> = {
                    let keep: std::collections::HashSet<Pk> = teams.iter().map(|t| t.pk).collect();
                    self.teams.pks().filter(|pk| !keep.contains(pk)).collect()
                };
                let next = self.team_adapter.upsert_many(&self.teams, teams);
                self.teams = self.team_adapter.remove_many(&next, gone);
            }),
            TournamentFetch::Games(result) => result.map(|games| {
                let gone: Vec<Pk> = {
                    let keep: std::collections::HashSet<Pk> = games.iter().map(|g| g.pk).collect();
                    self.games.pks().filter(|pk| !keep.contains(pk)).collect()
                };
                let next = self.game_adapter.upsert_many(&self.games, games);
                self.games = self.game_adapter.remove_many(&next, gone);
            }),
        };

        match result {
            Ok(()) => {
                self.statuses.loaded(slice);
                StoreUpdate::Loaded(slice)
            }
            Err(e) => {
                warn!(tournament_id = fetched.tracked_id, %slice, error = %e, "Tournament fetch failed");
                if slice == Slice::Metadata {
                    // No scope is coming; cache held users unscoped.
                    self.flush_pending_users();
                }
                let error = e.to_string();
                self.statuses.failed(slice, error.clone());
                StoreUpdate::LoadFailed { slice, error }
            }
        }
    }

    /// Remember users as participants and cache them under this tournament's
    /// scope, or hold them until the metadata names that scope. `replace`
    /// swaps the whole roster.
    fn store_users<I>(&mut self, users: I, replace: bool)
    where
        I: IntoIterator<Item = UserPayload>,
    {
        let users: Vec<UserPayload> = users.into_iter().collect();
        let pks: Vec<Pk> = users.iter().filter_map(|u| u.pk).collect();
        if replace {
            self.user_ids = pks;
        } else {
            for pk in pks {
                if !self.user_ids.contains(&pk) {
                    self.user_ids.push(pk);
                }
            }
        }
        self.statuses.loaded(Slice::Users);

        if self.metadata.is_none() {
            debug!(count = users.len(), "Holding users until tournament metadata arrives");
            self.pending_users.extend(users);
            return;
        }
        self.cache_users(users);
    }

    fn cache_users(&mut self, users: Vec<UserPayload>) {
        let total = users.len();
        let context = self.cache_context();
        let changed = self
            .user_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .upsert(users, context);
        debug!(changed, total, "Cached tournament users");
    }

    fn set_metadata(&mut self, meta: TournamentMeta) {
        self.metadata = Some(meta);
        self.flush_pending_users();
    }

    fn flush_pending_users(&mut self) {
        if self.pending_users.is_empty() {
            return;
        }
        let users = std::mem::take(&mut self.pending_users);
        self.cache_users(users);
    }

    // -- selectors ----------------------------------------------------------

    pub fn tracked_id(&self) -> Option<Pk> {
        self.tracked_id
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.link.channel()
    }

    pub fn manager(&self) -> &ConnectionManager {
        self.link.manager()
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn last_sequence(&self) -> u64 {
        self.sequence.last()
    }

    pub fn status(&self, slice: Slice) -> SliceStatus {
        self.statuses.get(slice)
    }

    pub fn is_loading(&self) -> bool {
        self.statuses.any_loading()
    }

    pub fn metadata(&self) -> Option<&TournamentMeta> {
        self.metadata.as_ref()
    }

    /// Scope for this tournament's user data.
    pub fn cache_context(&self) -> CacheContext {
        self.metadata
            .as_ref()
            .map(|m| CacheContext {
                org_id: m.organization,
                league_id: m.league,
            })
            .unwrap_or_default()
    }

    /// Participants resolved through the user cache, in roster order. Users
    /// held for missing metadata are not resolvable yet.
    pub fn users(&self) -> Vec<Arc<UserEntry>> {
        let cache = self.user_cache.read().unwrap_or_else(PoisonError::into_inner);
        self.user_ids
            .iter()
            .filter_map(|pk| cache.get_by_id(*pk))
            .collect()
    }

    pub fn user_ids(&self) -> &[Pk] {
        &self.user_ids
    }

    /// Current team snapshot; unchanged teams keep their `Arc` across updates.
    pub fn teams_state(&self) -> &EntityState<Team> {
        &self.teams
    }

    pub fn teams(&self) -> Vec<&Arc<Team>> {
        self.team_adapter.select_all(&self.teams)
    }

    pub fn team(&self, pk: Pk) -> Option<&Arc<Team>> {
        self.team_adapter.select_by_id(&self.teams, pk)
    }

    pub fn games_state(&self) -> &EntityState<Game> {
        &self.games
    }

    pub fn games(&self) -> Vec<&Arc<Game>> {
        self.game_adapter.select_all(&self.games)
    }

    /// Team the user captains or plays on.
    pub fn team_for_user(&self, user_pk: Pk) -> Option<&Arc<Team>> {
        self.teams
            .iter()
            .find(|t| t.captain == Some(user_pk) || t.members.contains(&user_pk))
    }

    /// Games of one bracket round, by bracket position.
    pub fn games_for_round(&self, round: u32) -> Vec<&Arc<Game>> {
        let mut games: Vec<&Arc<Game>> = self.games.iter().filter(|g| g.round == round).collect();
        games.sort_by_key(|g| (g.position, g.pk));
        games
    }

    pub fn pending_games(&self) -> Vec<&Arc<Game>> {
        self.games
            .iter()
            .filter(|g| g.status == GameStatus::Pending)
            .collect()
    }

    /// Activity feed, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &TournamentEvent> {
        self.events.values()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NoApi, BASE};
    use radiant_core::config::ReconnectConfig;
    use radiant_core::UserCache;
    use radiant_ws::MemoryConnector;
    use serde_json::json;

    fn store() -> (TournamentStore, MemoryConnector) {
        let connector = MemoryConnector::new();
        let manager = ConnectionManager::new(BASE, ReconnectConfig::default(), Arc::new(connector.clone()));
        let store = TournamentStore::new(Arc::new(NoApi), manager, UserCache::new().shared());
        (store, connector)
    }

    fn meta(pk: Pk) -> TournamentMeta {
        serde_json::from_value(json!({"pk": pk, "name": "Cup", "organization": 5, "league": 9})).unwrap()
    }

    fn team(pk: Pk, name: &str, captain: Pk, members: &[Pk]) -> Team {
        Team {
            pk,
            name: name.into(),
            captain: Some(captain),
            members: members.to_vec(),
            draft_order: None,
        }
    }

    fn game(pk: Pk, round: u32, position: u32, status: GameStatus) -> Game {
        serde_json::from_value(json!({
            "pk": pk, "round": round, "position": position,
            "status": match status { GameStatus::Pending => "pending", GameStatus::Live => "live", _ => "completed" }
        }))
        .unwrap()
    }

    fn fetched(store: &TournamentStore, sequence_at_request: u64, payload: TournamentFetch) -> Fetched<TournamentFetch> {
        Fetched {
            tracked_id: store.tracked_id().unwrap_or(0),
            epoch: store.epoch,
            sequence_at_request,
            payload,
        }
    }

    #[tokio::test]
    async fn tracking_subscribes_and_marks_slices_loading() {
        let (mut store, _connector) = store();
        assert!(store.set_tracked_id(Some(42)));
        assert!(!store.set_tracked_id(Some(42)));

        assert_eq!(store.channel(), Some(&Channel::tournament(42)));
        assert_eq!(store.manager().subscriber_count(&Channel::tournament(42)), 1);
        for slice in [Slice::Metadata, Slice::Users, Slice::Teams, Slice::Games] {
            assert!(store.status(slice).loading, "{slice} should be loading");
        }
    }

    #[tokio::test]
    async fn pushed_event_merges_slices_and_logs() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));

        let update = store.update_from_websocket(&json!({
            "type": "tournament_event",
            "sequence": 2,
            "event": {
                "pk": 10,
                "event_type": "team_created",
                "tournament": {"pk": 1, "name": "Cup", "organization": 5},
                "users": [{"pk": 7, "username": "ana", "mmr": 3100}],
                "teams": [{"pk": 3, "name": "Dire Straits", "captain": 7, "members": [7]}]
            }
        }));

        assert_eq!(update, StoreUpdate::Pushed { kind: "tournament_event", sequence: Some(2) });
        assert_eq!(store.last_sequence(), 2);
        assert_eq!(store.team(3).unwrap().name, "Dire Straits");
        assert_eq!(store.team_for_user(7).unwrap().pk, 3);
        let users = store.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].org_mmr(5), Some(3100));
        assert_eq!(store.events().count(), 1);
    }

    #[tokio::test]
    async fn removed_teams_leave_the_store() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));
        store.apply_fetch(fetched(&store, 0, TournamentFetch::Teams(Ok(vec![
            team(1, "A", 10, &[10]),
            team(2, "B", 20, &[20]),
        ]))));

        store.update_from_websocket(&json!({
            "type": "tournament_event",
            "event": {"pk": 11, "event_type": "team_deleted", "removed_teams": [2]}
        }));
        assert!(store.team(2).is_none());
        assert_eq!(store.teams().len(), 1);
    }

    #[tokio::test]
    async fn initial_events_only_fill_the_log() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));

        store.update_from_websocket(&json!({
            "type": "initial_events",
            "events": [
                {"pk": 2, "event_type": "b", "teams": [{"pk": 1, "name": "Old"}]},
                {"pk": 1, "event_type": "a"},
                {"pk": 2, "event_type": "b"}
            ]
        }));
        let pks: Vec<Pk> = store.events().map(|e| e.pk).collect();
        assert_eq!(pks, vec![1, 2]);
        assert!(store.teams().is_empty());
    }

    #[tokio::test]
    async fn invalid_frame_is_rejected_without_touching_state() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));

        let update = store.update_from_websocket(&json!({"type": "tournament_event", "sequence": 9}));
        assert!(matches!(update, StoreUpdate::Rejected(_)));
        assert_eq!(store.last_sequence(), 0);
    }

    #[tokio::test]
    async fn http_snapshot_does_not_overwrite_newer_push() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));

        store.update_from_websocket(&json!({
            "type": "tournament_event",
            "sequence": 1,
            "event": {"pk": 1, "event_type": "team_updated", "teams": [{"pk": 1, "name": "Pushed"}]}
        }));
        let update = store.apply_fetch(fetched(&store, 0, TournamentFetch::Teams(Ok(vec![team(1, "Fetched", 1, &[])]))));

        assert_eq!(update, StoreUpdate::StaleHttpSkipped(Slice::Teams));
        assert_eq!(store.team(1).unwrap().name, "Pushed");
        assert!(!store.status(Slice::Teams).loading);

        // Slices the push never wrote still accept the snapshot.
        let update = store.apply_fetch(fetched(&store, 0, TournamentFetch::Games(Ok(vec![game(5, 1, 0, GameStatus::Pending)]))));
        assert_eq!(update, StoreUpdate::Loaded(Slice::Games));
    }

    #[tokio::test]
    async fn fetch_errors_stay_in_their_slice() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));

        let update = store.apply_fetch(fetched(
            &store,
            0,
            TournamentFetch::Users(Err(ApiError::Http { status: 500, body: "boom".into() })),
        ));
        assert!(matches!(update, StoreUpdate::LoadFailed { slice: Slice::Users, .. }));
        assert_eq!(store.status(Slice::Users).error.as_deref(), Some("HTTP 500: boom"));

        store.apply_fetch(fetched(&store, 0, TournamentFetch::Metadata(Ok(meta(1)))));
        assert!(store.status(Slice::Metadata).loaded);
        assert_eq!(store.status(Slice::Metadata).error, None);
    }

    #[tokio::test]
    async fn fetch_for_previous_id_is_discarded() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));
        let stale = fetched(&store, 0, TournamentFetch::Metadata(Ok(meta(1))));

        store.set_tracked_id(Some(2));
        assert_eq!(store.apply_fetch(stale), StoreUpdate::Discarded(Slice::Metadata));
        assert!(store.metadata().is_none());
    }

    #[tokio::test]
    async fn users_are_cached_in_tournament_scope() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));
        store.apply_fetch(fetched(&store, 0, TournamentFetch::Metadata(Ok(meta(1)))));
        store.apply_fetch(fetched(
            &store,
            0,
            TournamentFetch::Users(Ok(vec![UserPayload::new(7, "ana").with_mmr(2800)])),
        ));

        let ana = &store.users()[0];
        assert_eq!(ana.league_mmr(9), Some(2800));
        assert_eq!(ana.org_mmr(5), Some(2800));
        assert_eq!(ana.core.mmr, None);
    }

    #[tokio::test]
    async fn users_before_metadata_wait_for_its_scope() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));
        store.apply_fetch(fetched(
            &store,
            0,
            TournamentFetch::Users(Ok(vec![UserPayload::new(7, "ana").with_mmr(2800)])),
        ));
        store.update_from_websocket(&json!({
            "type": "tournament_event",
            "event": {"pk": 3, "event_type": "player_joined", "users": [{"pk": 8, "username": "bo", "mmr": 3000}]}
        }));

        assert_eq!(store.user_ids(), &[7, 8]);
        assert!(store.status(Slice::Users).loaded);
        assert!(store.users().is_empty());

        store.apply_fetch(fetched(&store, 0, TournamentFetch::Metadata(Ok(meta(1)))));
        let users = store.users();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].org_mmr(5), Some(2800));
        assert_eq!(users[1].league_mmr(9), Some(3000));
        assert!(users.iter().all(|u| u.core.mmr.is_none()));
    }

    #[tokio::test]
    async fn failed_metadata_releases_held_users_unscoped() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));
        store.apply_fetch(fetched(
            &store,
            0,
            TournamentFetch::Users(Ok(vec![UserPayload::new(7, "ana").with_mmr(2800)])),
        ));

        store.apply_fetch(fetched(&store, 0, TournamentFetch::Metadata(Err(ApiError::Network("offline".into())))));
        let users = store.users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].core.mmr, Some(2800));
    }

    #[tokio::test]
    async fn bracket_selectors() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));
        store.apply_fetch(fetched(&store, 0, TournamentFetch::Games(Ok(vec![
            game(1, 1, 1, GameStatus::Completed),
            game(2, 1, 0, GameStatus::Pending),
            game(3, 2, 0, GameStatus::Pending),
        ]))));

        let round_one: Vec<Pk> = store.games_for_round(1).iter().map(|g| g.pk).collect();
        assert_eq!(round_one, vec![2, 1]);
        assert_eq!(store.pending_games().len(), 2);
    }

    #[tokio::test]
    async fn unchanged_snapshot_keeps_team_references() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));
        let teams = vec![team(1, "A", 10, &[10]), team(2, "B", 20, &[20])];
        store.apply_fetch(fetched(&store, 0, TournamentFetch::Teams(Ok(teams.clone()))));
        let before = store.teams_state().clone();

        store.apply_fetch(fetched(&store, 0, TournamentFetch::Teams(Ok(teams))));
        assert!(store.teams_state().same_as(&before));
    }

    #[tokio::test]
    async fn reset_unsubscribes_and_clears() {
        let (mut store, _connector) = store();
        store.set_tracked_id(Some(1));
        store.apply_fetch(fetched(&store, 0, TournamentFetch::Metadata(Ok(meta(1)))));

        store.reset();
        assert_eq!(store.tracked_id(), None);
        assert!(store.metadata().is_none());
        assert!(store.manager().channels().is_empty());
        assert!(store.next_update().await.is_none());
    }
}
