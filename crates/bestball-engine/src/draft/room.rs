// Room configuration and lifecycle status.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::pick::{ParticipantId, RoomId};

/// Longest pick window a room may use: one day.
pub const MAX_PICK_SECONDS: u64 = 24 * 60 * 60;

/// Everything fixed about a room before its draft starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub room_id: RoomId,
    /// Base draft order. Odd rounds pick in this order, even rounds reversed.
    pub participants: Vec<ParticipantId>,
    pub total_rounds: u32,
    /// Seconds each participant has to make a pick, at most
    /// [`MAX_PICK_SECONDS`].
    pub pick_seconds: u64,
}

impl RoomConfig {
    pub fn pick_duration(&self) -> Duration {
        Duration::from_secs(self.pick_seconds)
    }
}

/// Lifecycle status of a room as tracked by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Scheduled,
    Drafting,
    Complete,
    Abandoned,
}

impl RoomStatus {
    pub fn from_str_status(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(RoomStatus::Scheduled),
            "drafting" => Some(RoomStatus::Drafting),
            "complete" => Some(RoomStatus::Complete),
            "abandoned" => Some(RoomStatus::Abandoned),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Scheduled => "scheduled",
            RoomStatus::Drafting => "drafting",
            RoomStatus::Complete => "complete",
            RoomStatus::Abandoned => "abandoned",
        }
    }

    /// Complete and abandoned rooms never accept another pick.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoomStatus::Complete | RoomStatus::Abandoned)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
