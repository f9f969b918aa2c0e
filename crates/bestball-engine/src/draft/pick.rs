// Committed pick records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type RoomId = String;
pub type ParticipantId = String;
pub type PlayerId = String;

/// Who made a pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickSource {
    Human,
    Autodraft,
}

impl PickSource {
    /// Parse the persisted form ("human" / "autodraft").
    pub fn from_str_source(s: &str) -> Option<Self> {
        match s {
            "human" => Some(PickSource::Human),
            "autodraft" => Some(PickSource::Autodraft),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PickSource::Human => "human",
            PickSource::Autodraft => "autodraft",
        }
    }
}

impl fmt::Display for PickSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single committed pick. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
    /// Overall pick number (1-indexed, monotonically increasing).
    pub pick_number: u32,
    /// Round this pick belongs to (1-indexed).
    pub round: u32,
    /// Position of this pick within its round (1-indexed).
    pub slot_in_round: u32,
    /// The participant who owned the pick.
    pub participant_id: ParticipantId,
    /// The drafted player. Always set for committed picks; mirrors the
    /// nullable column in the pick log, and a log row without one is rejected
    /// on restore.
    pub player_id: Option<PlayerId>,
    pub committed_at: DateTime<Utc>,
    pub source: PickSource,
}
