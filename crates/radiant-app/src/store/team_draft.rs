// Team-draft store: captains picking players into teams, one pick per round.

use std::collections::BTreeMap;
use std::sync::Arc;

use radiant_core::model::{Draft, DraftEvent, DraftRound, UserPayload};
use radiant_core::protocol::{self, Channel, DraftMessage, Inbound, SequenceTracker};
use radiant_core::Pk;
use radiant_ws::{ChannelEvent, ConnectionManager, ConnectionState};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    judge_fetch, observe_sequence, FetchSink, FetchVerdict, Fetched, Link, LinkEvent, Slice,
    SliceStatus, SliceStatuses, StoreUpdate,
};
use crate::api::{ApiError, BackendApi};

const STORE: &str = "team_draft";

#[derive(Debug)]
pub enum DraftFetch {
    Draft(Result<Draft, ApiError>),
    Events(Result<Vec<DraftEvent>, ApiError>),
}

impl DraftFetch {
    fn slice(&self) -> Slice {
        match self {
            DraftFetch::Draft(_) => Slice::Draft,
            DraftFetch::Events(_) => Slice::Events,
        }
    }
}

pub struct TeamDraftStore {
    api: Arc<dyn BackendApi>,
    link: Link<DraftFetch>,
    me: Option<Pk>,

    tracked_id: Option<Pk>,
    epoch: u64,
    draft: Option<Arc<Draft>>,
    events: BTreeMap<Pk, DraftEvent>,
    statuses: SliceStatuses,
    connection: ConnectionState,
    sequence: SequenceTracker,
}

impl TeamDraftStore {
    pub fn new(api: Arc<dyn BackendApi>, manager: ConnectionManager) -> Self {
        Self {
            api,
            link: Link::new(manager),
            me: None,
            tracked_id: None,
            epoch: 0,
            draft: None,
            events: BTreeMap::new(),
            statuses: SliceStatuses::default(),
            connection: ConnectionState::Disconnected,
            sequence: SequenceTracker::new(),
        }
    }

    /// The logged-in user, for `is_my_turn`.
    pub fn set_current_user(&mut self, user_pk: Option<Pk>) {
        self.me = user_pk;
    }

    // -- lifecycle ----------------------------------------------------------

    pub fn set_tracked_id(&mut self, id: Option<Pk>) -> bool {
        if self.tracked_id == id {
            return false;
        }
        self.clear();
        self.tracked_id = id;
        if let Some(id) = id {
            info!(draft_id = id, "Tracking team draft");
            self.link.connect(Channel::draft(id));
            self.load_full();
        }
        true
    }

    pub fn reset(&mut self) {
        self.clear();
        self.tracked_id = None;
    }

    fn clear(&mut self) {
        self.link.disconnect();
        self.epoch += 1;
        self.draft = None;
        self.events.clear();
        self.statuses.clear();
        self.connection = ConnectionState::Disconnected;
        self.sequence.reset();
    }

    // -- loaders ------------------------------------------------------------

    pub fn load_draft(&mut self) {
        self.spawn_load(&[Slice::Draft], |api, id, sink| async move {
            sink.send(DraftFetch::Draft(api.fetch_draft(id).await));
        });
    }

    pub fn load_events(&mut self) {
        self.spawn_load(&[Slice::Events], |api, id, sink| async move {
            sink.send(DraftFetch::Events(api.fetch_draft_events(id).await));
        });
    }

    /// Draft state first, then the event history.
    pub fn load_full(&mut self) {
        self.spawn_load(&[Slice::Draft, Slice::Events], |api, id, sink| async move {
            sink.send(DraftFetch::Draft(api.fetch_draft(id).await));
            sink.send(DraftFetch::Events(api.fetch_draft_events(id).await));
        });
    }

    fn spawn_load<F, Fut>(&mut self, slices: &[Slice], job: F)
    where
        F: FnOnce(Arc<dyn BackendApi>, Pk, FetchSink<DraftFetch>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let Some(id) = self.tracked_id else {
            warn!("Draft load requested with no tracked id");
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

    pub fn update_from_websocket(&mut self, frame: &Value) -> StoreUpdate {
        let inbound: Inbound<DraftMessage> = match protocol::decode(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(draft_id = ?self.tracked_id, error = %e, "Rejected draft frame");
                return StoreUpdate::Rejected(e.to_string());
            }
        };
        observe_sequence(&mut self.sequence, STORE, self.tracked_id, inbound.sequence);

        let kind = match inbound.message {
            DraftMessage::InitialEvents { events } => {
                // The newest embedded state is the draft as of connect time.
                let latest = events
                    .iter()
                    .filter(|e| e.draft_state.is_some())
                    .max_by_key(|e| e.pk)
                    .and_then(|e| e.draft_state.clone());
                if let Some(state) = latest {
                    self.set_draft(state);
                }
                for event in events {
                    self.events.insert(event.pk, event);
                }
                self.statuses.loaded(Slice::Events);
                "initial_events"
            }
            DraftMessage::DraftEvent { event } => {
                debug!(event_type = %event.event_type, pk = event.pk, "Merging draft event");
                if let Some(state) = &event.draft_state {
                    self.set_draft(state.clone());
                }
                self.events.insert(event.pk, event);
                "draft_event"
            }
        };
        StoreUpdate::Pushed {
            kind,
            sequence: inbound.sequence,
        }
    }

    fn set_draft(&mut self, draft: Draft) {
        if self.draft.as_deref() != Some(&draft) {
            self.draft = Some(Arc::new(draft));
        }
        self.statuses.loaded(Slice::Draft);
    }

    pub fn apply_fetch(&mut self, fetched: Fetched<DraftFetch>) -> StoreUpdate {
        let slice = fetched.payload.slice();
        match judge_fetch(&fetched, self.epoch, &self.sequence, &self.statuses, slice) {
            FetchVerdict::Discard => {
                debug!(draft_id = fetched.tracked_id, %slice, "Discarding fetch for abandoned draft");
                return StoreUpdate::Discarded(slice);
            }
            FetchVerdict::SkipStale => {
                info!(
                    draft_id = fetched.tracked_id,
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
            DraftFetch::Draft(result) => result.map(|draft| self.set_draft(draft)),
            // Merged rather than replaced: pushes may already hold newer events.
            DraftFetch::Events(result) => result.map(|events| {
                self.events.extend(events.into_iter().map(|e| (e.pk, e)));
            }),
        };

        match result {
            Ok(()) => {
                self.statuses.loaded(slice);
                StoreUpdate::Loaded(slice)
            }
            Err(e) => {
                warn!(draft_id = fetched.tracked_id, %slice, error = %e, "Draft fetch failed");
                let error = e.to_string();
                self.statuses.failed(slice, error.clone());
                StoreUpdate::LoadFailed { slice, error }
            }
        }
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

    pub fn draft(&self) -> Option<&Arc<Draft>> {
        self.draft.as_ref()
    }

    /// The round being picked: the server's `latest_round`, else the first
    /// round without a choice.
    pub fn current_round(&self) -> Option<&DraftRound> {
        let draft = self.draft.as_deref()?;
        draft
            .latest_round
            .and_then(|pk| draft.rounds.iter().find(|r| r.pk == pk))
            .or_else(|| {
                let mut open: Vec<&DraftRound> = draft.rounds.iter().filter(|r| !r.is_picked()).collect();
                open.sort_by_key(|r| r.pick_number);
                open.into_iter().next()
            })
    }

    pub fn users_remaining(&self) -> &[UserPayload] {
        self.draft
            .as_deref()
            .map(|d| d.users_remaining.as_slice())
            .unwrap_or(&[])
    }

    /// Team whose captain is on the clock.
    pub fn current_team(&self) -> Option<Pk> {
        self.current_round()?.team
    }

    pub fn is_my_turn(&self) -> bool {
        match (self.me, self.current_round()) {
            (Some(me), Some(round)) => !round.is_picked() && round.captain_pk() == Some(me),
            _ => false,
        }
    }

    pub fn picks_made(&self) -> usize {
        self.draft
            .as_deref()
            .map_or(0, |d| d.rounds.iter().filter(|r| r.is_picked()).count())
    }

    pub fn rounds_remaining(&self) -> usize {
        self.draft
            .as_deref()
            .map_or(0, |d| d.rounds.iter().filter(|r| !r.is_picked()).count())
    }

    pub fn events(&self) -> impl Iterator<Item = &DraftEvent> {
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
    use radiant_ws::MemoryConnector;
    use serde_json::json;

    fn store() -> TeamDraftStore {
        let manager = ConnectionManager::new(
            BASE,
            ReconnectConfig::default(),
            Arc::new(MemoryConnector::new()),
        );
        TeamDraftStore::new(Arc::new(NoApi), manager)
    }

    /// Three rounds; round 1 picked, round 2 is captain 20's.
    fn draft_json(latest_round: Option<Pk>) -> Value {
        json!({
            "pk": 17,
            "tournament": 1,
            "draft_style": "snake",
            "latest_round": latest_round,
            "users_remaining": [{"pk": 31, "username": "c"}, {"pk": 32, "username": "d"}],
            "rounds": [
                {"pk": 101, "pick_number": 1, "captain": {"pk": 10}, "team": 1, "choice": {"pk": 30}},
                {"pk": 102, "pick_number": 2, "captain": {"pk": 20}, "team": 2},
                {"pk": 103, "pick_number": 3, "captain": {"pk": 20}, "team": 2}
            ]
        })
    }

    fn draft(latest_round: Option<Pk>) -> Draft {
        serde_json::from_value(draft_json(latest_round)).unwrap()
    }

    fn fetched(store: &TeamDraftStore, sequence_at_request: u64, payload: DraftFetch) -> Fetched<DraftFetch> {
        Fetched {
            tracked_id: 17,
            epoch: store.epoch,
            sequence_at_request,
            payload,
        }
    }

    #[tokio::test]
    async fn derived_helpers() {
        let mut store = store();
        store.set_tracked_id(Some(17));
        store.set_current_user(Some(20));
        store.apply_fetch(fetched(&store, 0, DraftFetch::Draft(Ok(draft(None)))));

        assert_eq!(store.current_round().map(|r| r.pk), Some(102));
        assert_eq!(store.current_team(), Some(2));
        assert!(store.is_my_turn());
        assert_eq!(store.picks_made(), 1);
        assert_eq!(store.rounds_remaining(), 2);
        assert_eq!(store.users_remaining().len(), 2);

        store.set_current_user(Some(10));
        assert!(!store.is_my_turn());
    }

    #[tokio::test]
    async fn latest_round_from_server_wins() {
        let mut store = store();
        store.set_tracked_id(Some(17));
        store.apply_fetch(fetched(&store, 0, DraftFetch::Draft(Ok(draft(Some(103))))));
        assert_eq!(store.current_round().map(|r| r.pk), Some(103));
    }

    #[tokio::test]
    async fn draft_event_replaces_state() {
        let mut store = store();
        store.set_tracked_id(Some(17));
        store.apply_fetch(fetched(&store, 0, DraftFetch::Draft(Ok(draft(None)))));

        let mut next = draft_json(Some(103));
        next["rounds"][1]["choice"] = json!({"pk": 31});
        next["users_remaining"] = json!([{"pk": 32}]);
        let update = store.update_from_websocket(&json!({
            "type": "draft_event",
            "sequence": 1,
            "event": {"pk": 5, "event_type": "player_picked", "draft_round": 102, "draft_state": next}
        }));

        assert_eq!(update, StoreUpdate::Pushed { kind: "draft_event", sequence: Some(1) });
        assert_eq!(store.picks_made(), 2);
        assert_eq!(store.users_remaining().len(), 1);
        assert_eq!(store.events().count(), 1);
    }

    #[tokio::test]
    async fn identical_push_keeps_draft_reference() {
        let mut store = store();
        store.set_tracked_id(Some(17));
        store.apply_fetch(fetched(&store, 0, DraftFetch::Draft(Ok(draft(None)))));
        let before = Arc::clone(store.draft().unwrap());

        store.update_from_websocket(&json!({
            "type": "draft_event",
            "event": {"pk": 6, "event_type": "heartbeat", "draft_state": draft_json(None)}
        }));
        assert!(Arc::ptr_eq(&before, store.draft().unwrap()));
    }

    #[tokio::test]
    async fn initial_events_apply_newest_embedded_state() {
        let mut store = store();
        store.set_tracked_id(Some(17));

        store.update_from_websocket(&json!({
            "type": "initial_events",
            "events": [
                {"pk": 2, "event_type": "pick", "draft_state": draft_json(Some(103))},
                {"pk": 1, "event_type": "start", "draft_state": draft_json(None)},
                {"pk": 3, "event_type": "chat"}
            ]
        }));
        assert_eq!(store.current_round().map(|r| r.pk), Some(103));
        assert_eq!(store.events().count(), 3);
        assert!(store.status(Slice::Draft).loaded);
    }

    #[tokio::test]
    async fn stale_http_draft_is_skipped_after_push() {
        let mut store = store();
        store.set_tracked_id(Some(17));

        store.update_from_websocket(&json!({
            "type": "draft_event",
            "sequence": 3,
            "event": {"pk": 9, "event_type": "player_picked", "draft_state": draft_json(Some(103))}
        }));
        let update = store.apply_fetch(fetched(&store, 0, DraftFetch::Draft(Ok(draft(None)))));

        assert_eq!(update, StoreUpdate::StaleHttpSkipped(Slice::Draft));
        assert_eq!(store.current_round().map(|r| r.pk), Some(103));
    }

    #[tokio::test]
    async fn empty_store_has_neutral_helpers() {
        let store = store();
        assert!(store.current_round().is_none());
        assert!(store.users_remaining().is_empty());
        assert!(!store.is_my_turn());
        assert_eq!(store.rounds_remaining(), 0);
    }
}
