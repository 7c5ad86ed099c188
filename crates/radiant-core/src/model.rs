// Domain snapshots exchanged with the backend over HTTP and WebSocket.
//
// Field names follow the backend's JSON (snake_case). Optional collections
// default to empty so partial payloads embedded in push events still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::adapter::{Entity, Pk};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Per-role preference rank (0 = unwilling, 1 = favourite, higher = less keen).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionPreferences {
    #[serde(default)]
    pub carry: u8,
    #[serde(default)]
    pub mid: u8,
    #[serde(default)]
    pub offlane: u8,
    #[serde(default)]
    pub soft_support: u8,
    #[serde(default)]
    pub hard_support: u8,
}

/// A user as it appears in any HTTP response or push payload.
///
/// `pk` is optional because some embedded payloads arrive incomplete; the
/// user cache drops those. `mmr` is scope-relative when the payload was
/// fetched under an organization or league.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    #[serde(default)]
    pub pk: Option<Pk>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub discord_id: Option<String>,
    #[serde(default)]
    pub steam_id: Option<i64>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub positions: Option<PositionPreferences>,
    #[serde(default)]
    pub mmr: Option<i32>,
}

impl UserPayload {
    pub fn new(pk: Pk, username: &str) -> Self {
        Self {
            pk: Some(pk),
            username: Some(username.to_string()),
            ..Self::default()
        }
    }

    pub fn with_mmr(mut self, mmr: i32) -> Self {
        self.mmr = Some(mmr);
        self
    }
}

// ---------------------------------------------------------------------------
// Tournament
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    #[default]
    Future,
    InProgress,
    Past,
    #[serde(other)]
    Unknown,
}

/// Cheap tournament metadata (no rosters, no bracket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentMeta {
    pub pk: Pk,
    pub name: String,
    #[serde(default)]
    pub state: TournamentStatus,
    #[serde(default)]
    pub tournament_type: Option<String>,
    #[serde(default)]
    pub date_played: Option<DateTime<Utc>>,
    #[serde(default)]
    pub organization: Option<Pk>,
    #[serde(default)]
    pub league: Option<Pk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub pk: Pk,
    pub name: String,
    #[serde(default)]
    pub captain: Option<Pk>,
    #[serde(default)]
    pub members: Vec<Pk>,
    #[serde(default)]
    pub draft_order: Option<u32>,
}

impl Entity for Team {
    fn pk(&self) -> Pk {
        self.pk
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    Pending,
    Live,
    Completed,
    #[serde(other)]
    Unknown,
}

/// One bracket slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub pk: Pk,
    #[serde(default)]
    pub round: u32,
    #[serde(default)]
    pub bracket_type: Option<String>,
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub radiant_team: Option<Pk>,
    #[serde(default)]
    pub dire_team: Option<Pk>,
    #[serde(default)]
    pub winning_team: Option<Pk>,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default)]
    pub next_game: Option<Pk>,
    #[serde(default)]
    pub match_id: Option<i64>,
}

impl Entity for Game {
    fn pk(&self) -> Pk {
        self.pk
    }
}

/// A tournament activity event. Any embedded slice data is a partial update
/// to merge into the tracked tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentEvent {
    pub pk: Pk,
    pub event_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tournament: Option<TournamentMeta>,
    #[serde(default)]
    pub users: Vec<UserPayload>,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub removed_teams: Vec<Pk>,
    #[serde(default)]
    pub games: Vec<Game>,
}

// ---------------------------------------------------------------------------
// Team draft
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStyle {
    #[default]
    Snake,
    Normal,
    Shuffle,
    #[serde(other)]
    Unknown,
}

/// One captain pick slot in the team draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRound {
    pub pk: Pk,
    pub pick_number: u32,
    #[serde(default)]
    pub captain: Option<UserPayload>,
    #[serde(default)]
    pub team: Option<Pk>,
    #[serde(default)]
    pub choice: Option<UserPayload>,
}

impl DraftRound {
    pub fn captain_pk(&self) -> Option<Pk> {
        self.captain.as_ref().and_then(|c| c.pk)
    }

    pub fn is_picked(&self) -> bool {
        self.choice.is_some()
    }
}

/// Full team-draft state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub pk: Pk,
    #[serde(default)]
    pub tournament: Option<Pk>,
    #[serde(default)]
    pub draft_style: DraftStyle,
    #[serde(default)]
    pub rounds: Vec<DraftRound>,
    #[serde(default)]
    pub users_remaining: Vec<UserPayload>,
    #[serde(default)]
    pub latest_round: Option<Pk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftEvent {
    pub pk: Pk,
    pub event_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft_round: Option<Pk>,
    #[serde(default)]
    pub actor: Option<UserPayload>,
    #[serde(default)]
    pub draft_state: Option<Draft>,
}

// ---------------------------------------------------------------------------
// Hero draft (captains' mode pick/ban)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeroDraftState {
    #[default]
    WaitingForCaptains,
    Rolling,
    Choosing,
    Drafting,
    Paused,
    Completed,
    Abandoned,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeroAction {
    Pick,
    Ban,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    #[default]
    Planned,
    Active,
    Completed,
    #[serde(other)]
    Unknown,
}

/// One side of a hero draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftTeam {
    pub pk: Pk,
    #[serde(default)]
    pub captain: Option<UserPayload>,
    #[serde(default)]
    pub team: Option<Pk>,
    #[serde(default)]
    pub is_first_pick: Option<bool>,
    #[serde(default)]
    pub is_radiant: Option<bool>,
    /// Remaining reserve time in milliseconds.
    #[serde(default)]
    pub reserve_time_remaining: u64,
    #[serde(default)]
    pub is_ready: bool,
    #[serde(default)]
    pub is_connected: bool,
}

impl DraftTeam {
    pub fn captain_pk(&self) -> Option<Pk> {
        self.captain.as_ref().and_then(|c| c.pk)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeroDraftRound {
    pub round_number: u32,
    pub action_type: HeroAction,
    /// `DraftTeam::pk` of the side acting this round.
    pub draft_team: Pk,
    #[serde(default)]
    pub hero_id: Option<u32>,
    #[serde(default)]
    pub state: RoundState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeroDraft {
    pub pk: Pk,
    #[serde(default)]
    pub game: Option<Pk>,
    #[serde(default)]
    pub state: HeroDraftState,
    #[serde(default)]
    pub draft_teams: Vec<DraftTeam>,
    #[serde(default)]
    pub rounds: Vec<HeroDraftRound>,
    #[serde(default)]
    pub current_round: Option<u32>,
    #[serde(default)]
    pub roll_winner: Option<Pk>,
}

/// Periodic countdown broadcast. Carries scalar timing fields only and must
/// never be mistaken for a full `HeroDraft`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeroDraftTick {
    #[serde(default)]
    pub current_round: Option<u32>,
    #[serde(default)]
    pub active_team_id: Option<Pk>,
    #[serde(default)]
    pub grace_time_remaining_ms: u64,
    #[serde(default)]
    pub team_a_id: Option<Pk>,
    #[serde(default)]
    pub team_a_reserve_ms: u64,
    #[serde(default)]
    pub team_b_id: Option<Pk>,
    #[serde(default)]
    pub team_b_reserve_ms: u64,
    #[serde(default)]
    pub draft_state: HeroDraftState,
}
