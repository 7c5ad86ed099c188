// Hero-draft store: captains' mode pick/ban with a server-driven countdown.
//
// Full draft states and countdown ticks share the channel. A tick only
// refreshes the timing snapshot; it never replaces the draft.

use std::collections::BTreeSet;
use std::sync::Arc;

use radiant_core::model::{DraftTeam, HeroAction, HeroDraft, HeroDraftRound, HeroDraftState, HeroDraftTick, RoundState};
use radiant_core::protocol::{self, Channel, HeroDraftMessage, Inbound, SequenceTracker};
use radiant_core::Pk;
use radiant_ws::{ChannelEvent, ConnectionManager, ConnectionState};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use super::{
    judge_fetch, observe_sequence, FetchVerdict, Fetched, Link, LinkEvent, Slice, SliceStatus,
    SliceStatuses, StoreUpdate,
};
use crate::api::{ApiError, BackendApi};

const STORE: &str = "hero_draft";

pub type HeroDraftFetch = Result<HeroDraft, ApiError>;

pub struct HeroDraftStore {
    api: Arc<dyn BackendApi>,
    link: Link<HeroDraftFetch>,
    me: Option<Pk>,

    tracked_id: Option<Pk>,
    epoch: u64,
    draft: Option<Arc<HeroDraft>>,
    tick: Option<HeroDraftTick>,
    statuses: SliceStatuses,
    connection: ConnectionState,
    /// Every frame, for ordering diagnostics.
    sequence: SequenceTracker,
    /// Frames that wrote draft state. Ticks and stateless events do not
    /// count, so they never cause a fresh HTTP snapshot to be skipped.
    state_sequence: SequenceTracker,
}

impl HeroDraftStore {
    pub fn new(api: Arc<dyn BackendApi>, manager: ConnectionManager) -> Self {
        Self {
            api,
            link: Link::new(manager),
            me: None,
            tracked_id: None,
            epoch: 0,
            draft: None,
            tick: None,
            statuses: SliceStatuses::default(),
            connection: ConnectionState::Disconnected,
            sequence: SequenceTracker::new(),
            state_sequence: SequenceTracker::new(),
        }
    }

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
            info!(hero_draft_id = id, "Tracking hero draft");
            self.link.connect(Channel::hero_draft(id));
            self.load_draft();
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
        self.tick = None;
        self.statuses.clear();
        self.connection = ConnectionState::Disconnected;
        self.sequence.reset();
        self.state_sequence.reset();
    }

    pub fn load_draft(&mut self) {
        let Some(id) = self.tracked_id else {
            warn!("Hero draft load requested with no tracked id");
            return;
        };
        self.statuses.start(Slice::HeroDraft);
        let api = Arc::clone(&self.api);
        self.link.spawn(id, self.epoch, self.state_sequence.last(), move |sink| async move {
            sink.send(api.fetch_hero_draft(id).await);
        });
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
        let inbound: Inbound<HeroDraftMessage> = match protocol::decode(frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(hero_draft_id = ?self.tracked_id, error = %e, "Rejected hero draft frame");
                return StoreUpdate::Rejected(e.to_string());
            }
        };
        observe_sequence(&mut self.sequence, STORE, self.tracked_id, inbound.sequence);

        let kind = match inbound.message {
            HeroDraftMessage::HerodraftTick(tick) => {
                trace!(round = ?tick.current_round, grace_ms = tick.grace_time_remaining_ms, "Tick");
                self.tick = Some(tick);
                return StoreUpdate::Ticked;
            }
            HeroDraftMessage::InitialState { draft_state } => {
                self.set_draft(draft_state);
                self.state_sequence.observe(inbound.sequence);
                "initial_state"
            }
            HeroDraftMessage::HerodraftEvent { event_type, draft_state } => {
                debug!(%event_type, "Hero draft event");
                if let Some(state) = draft_state {
                    self.set_draft(state);
                    self.state_sequence.observe(inbound.sequence);
                }
                "herodraft_event"
            }
        };
        StoreUpdate::Pushed {
            kind,
            sequence: inbound.sequence,
        }
    }

    fn set_draft(&mut self, draft: HeroDraft) {
        if self.draft.as_deref() != Some(&draft) {
            // The countdown described the previous state.
            self.tick = None;
            self.draft = Some(Arc::new(draft));
        }
        self.statuses.loaded(Slice::HeroDraft);
    }

    pub fn apply_fetch(&mut self, fetched: Fetched<HeroDraftFetch>) -> StoreUpdate {
        let slice = Slice::HeroDraft;
        match judge_fetch(&fetched, self.epoch, &self.state_sequence, &self.statuses, slice) {
            FetchVerdict::Discard => {
                debug!(hero_draft_id = fetched.tracked_id, "Discarding fetch for abandoned hero draft");
                return StoreUpdate::Discarded(slice);
            }
            FetchVerdict::SkipStale => {
                info!(
                    hero_draft_id = fetched.tracked_id,
                    requested_at = fetched.sequence_at_request,
                    last_sequence = self.state_sequence.last(),
                    "Skipping HTTP result older than pushed state"
                );
                self.statuses.settled(slice);
                return StoreUpdate::StaleHttpSkipped(slice);
            }
            FetchVerdict::Apply => {}
        }

        match fetched.payload {
            Ok(draft) => {
                self.set_draft(draft);
                StoreUpdate::Loaded(slice)
            }
            Err(e) => {
                warn!(hero_draft_id = fetched.tracked_id, error = %e, "Hero draft fetch failed");
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

    pub fn draft(&self) -> Option<&Arc<HeroDraft>> {
        self.draft.as_ref()
    }

    pub fn tick(&self) -> Option<&HeroDraftTick> {
        self.tick.as_ref()
    }

    /// Phase of the draft, preferring the latest tick.
    pub fn phase(&self) -> Option<HeroDraftState> {
        self.tick
            .as_ref()
            .map(|t| t.draft_state)
            .or_else(|| self.draft.as_deref().map(|d| d.state))
    }

    fn heroes(&self, action: HeroAction) -> BTreeSet<u32> {
        self.draft
            .as_deref()
            .map(|d| {
                d.rounds
                    .iter()
                    .filter(|r| r.action_type == action)
                    .filter_map(|r| r.hero_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn banned_hero_ids(&self) -> BTreeSet<u32> {
        self.heroes(HeroAction::Ban)
    }

    pub fn picked_hero_ids(&self) -> BTreeSet<u32> {
        self.heroes(HeroAction::Pick)
    }

    /// Heroes that can no longer be picked or banned.
    pub fn unavailable_hero_ids(&self) -> BTreeSet<u32> {
        let mut ids = self.banned_hero_ids();
        ids.extend(self.picked_hero_ids());
        ids
    }

    pub fn current_round(&self) -> Option<&HeroDraftRound> {
        let draft = self.draft.as_deref()?;
        let number = self
            .tick
            .as_ref()
            .and_then(|t| t.current_round)
            .or(draft.current_round);
        number
            .and_then(|n| draft.rounds.iter().find(|r| r.round_number == n))
            .or_else(|| draft.rounds.iter().find(|r| r.state == RoundState::Active))
    }

    /// `DraftTeam::pk` of the side on the clock.
    pub fn active_team(&self) -> Option<Pk> {
        self.tick
            .as_ref()
            .and_then(|t| t.active_team_id)
            .or_else(|| self.current_round().map(|r| r.draft_team))
    }

    pub fn my_team(&self) -> Option<&DraftTeam> {
        let me = self.me?;
        self.draft
            .as_deref()?
            .draft_teams
            .iter()
            .find(|t| t.captain_pk() == Some(me))
    }

    pub fn is_my_turn(&self) -> bool {
        if self.phase() != Some(HeroDraftState::Drafting) {
            return false;
        }
        match (self.my_team(), self.active_team()) {
            (Some(mine), Some(active)) => mine.pk == active,
            _ => false,
        }
    }

    pub fn grace_time_remaining_ms(&self) -> Option<u64> {
        self.tick.as_ref().map(|t| t.grace_time_remaining_ms)
    }

    /// Reserve time for one side: the tick's figure when it names the team,
    /// else the last full state's.
    pub fn reserve_time_ms(&self, draft_team: Pk) -> Option<u64> {
        if let Some(tick) = &self.tick {
            if tick.team_a_id == Some(draft_team) {
                return Some(tick.team_a_reserve_ms);
            }
            if tick.team_b_id == Some(draft_team) {
                return Some(tick.team_b_reserve_ms);
            }
        }
        self.draft
            .as_deref()?
            .draft_teams
            .iter()
            .find(|t| t.pk == draft_team)
            .map(|t| t.reserve_time_remaining)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
