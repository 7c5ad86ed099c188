// Inbound WebSocket protocol: channel naming, frame validation, and the
// closed message unions each store consumes.
//
// Every frame is a JSON object with a `type` discriminator and an optional
// numeric `sequence`. Frames are parsed to a `serde_json::Value` once by the
// connection manager and narrowed to a typed message by the store that owns
// the channel.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::entity::adapter::Pk;
use crate::model::{DraftEvent, HeroDraft, HeroDraftTick, TournamentEvent};

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// A logical WebSocket topic such as `tournament/42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn tournament(id: Pk) -> Self {
        Self(format!("tournament/{id}"))
    }

    pub fn draft(id: Pk) -> Self {
        Self(format!("draft/{id}"))
    }

    pub fn hero_draft(id: Pk) -> Self {
        Self(format!("herodraft/{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Socket URL for this channel under `ws_base` (`ws://host` or `wss://host`).
    pub fn url(&self, ws_base: &str) -> String {
        format!("{}/ws/{}/", ws_base.trim_end_matches('/'), self.0)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("`{kind}` frame does not match the expected schema: {message}")]
    Schema { kind: String, message: String },
}

// ---------------------------------------------------------------------------
// Frame helpers
// ---------------------------------------------------------------------------

/// A validated message plus the sequence number its frame carried.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound<M> {
    pub sequence: Option<u64>,
    pub message: M,
}

pub fn parse_frame(text: &str) -> Result<Value, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::InvalidJson)
}

/// The frame's `type` discriminator, if it has one.
pub fn message_type(frame: &Value) -> Option<&str> {
    frame.get("type").and_then(Value::as_str)
}

/// The frame's sequence number. Absent, non-numeric and zero all mean
/// "untracked".
pub fn sequence_of(frame: &Value) -> Option<u64> {
    frame
        .get("sequence")
        .and_then(Value::as_u64)
        .filter(|&seq| seq > 0)
}

/// Narrow a parsed frame to one of the closed message unions below.
pub fn decode<M: DeserializeOwned>(frame: &Value) -> Result<Inbound<M>, ProtocolError> {
    let kind = message_type(frame).ok_or(ProtocolError::MissingType)?;
    let message = M::deserialize(frame).map_err(|e| ProtocolError::Schema {
        kind: kind.to_string(),
        message: e.to_string(),
    })?;
    Ok(Inbound {
        sequence: sequence_of(frame),
        message,
    })
}

// ---------------------------------------------------------------------------
// Message unions
// ---------------------------------------------------------------------------

/// Frames on a `tournament/{id}` channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TournamentMessage {
    /// Replay of recent events sent right after connect.
    InitialEvents {
        #[serde(default)]
        events: Vec<TournamentEvent>,
    },
    TournamentEvent { event: TournamentEvent },
}

/// Frames on a `draft/{id}` channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DraftMessage {
    InitialEvents {
        #[serde(default)]
        events: Vec<DraftEvent>,
    },
    DraftEvent { event: DraftEvent },
}

/// Frames on a `herodraft/{id}` channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeroDraftMessage {
    InitialState { draft_state: HeroDraft },
    HerodraftEvent {
        event_type: String,
        #[serde(default)]
        draft_state: Option<HeroDraft>,
    },
    /// Countdown only; never a full draft state.
    HerodraftTick(HeroDraftTick),
}

// ---------------------------------------------------------------------------
// Sequence tracking
// ---------------------------------------------------------------------------

/// Outcome of comparing a frame's sequence with the last one seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Frame carried no usable sequence.
    Untracked,
    InOrder,
    /// Sequence did not advance past `last`. The frame is still applied.
    OutOfOrder { last: u64 },
}

/// Last-seen sequence for one channel or store. Used for diagnostics and
/// the HTTP/WebSocket race check, never to drop frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    last: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last sequence seen, 0 when none yet.
    pub fn last(&self) -> u64 {
        self.last
    }

    /// Record `sequence` and report whether it advanced. The tracker always
    /// moves to the latest frame's value, even when that goes backwards.
    pub fn observe(&mut self, sequence: Option<u64>) -> SequenceCheck {
        let Some(seq) = sequence.filter(|&s| s > 0) else {
            return SequenceCheck::Untracked;
        };
        let previous = self.last;
        self.last = seq;
        if seq <= previous {
            SequenceCheck::OutOfOrder { last: previous }
        } else {
            SequenceCheck::InOrder
        }
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
