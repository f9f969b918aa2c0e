// Domain error types shared by the draft engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::draft::pick::{ParticipantId, PlayerId};

// ---------------------------------------------------------------------------
// DraftError
// ---------------------------------------------------------------------------

/// Every way a draft operation can fail.
///
/// Rejected-input variants are reported to the caller and leave the room
/// untouched. The remaining variants mean an invariant is broken and the room
/// cannot continue (see [`DraftError::is_fatal`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("pick {pick_number} belongs to {expected}, not {actual}")]
    NotYourTurn {
        pick_number: u32,
        expected: ParticipantId,
        actual: ParticipantId,
    },

    #[error("player {player_id} is not available")]
    PlayerUnavailable { player_id: PlayerId },

    #[error("the pick window for pick {pick_number} has closed")]
    PickWindowClosed { pick_number: u32 },

    #[error("pick number {pick_number} is outside 1..={total_picks}")]
    OutOfRange { pick_number: u32, total_picks: u32 },

    #[error("the draft is not accepting picks")]
    DraftNotActive,

    #[error("player {player_id} appears more than once in the queue")]
    DuplicateQueueEntry { player_id: PlayerId },

    #[error("participant {participant_id} is not in this room")]
    UnknownParticipant { participant_id: ParticipantId },

    #[error("the available pool is exhausted")]
    PoolExhausted,

    #[error("invalid room: {0}")]
    InvalidRoom(String),

    #[error("persisted pick log is inconsistent: {0}")]
    CorruptLog(String),
}

impl DraftError {
    /// Whether this error indicates a broken invariant that must take the
    /// room down, as opposed to a rejected request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DraftError::PoolExhausted | DraftError::CorruptLog(_) | DraftError::InvalidRoom(_)
        )
    }

    /// The wire-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DraftError::NotYourTurn { .. } => ErrorKind::NotYourTurn,
            DraftError::PlayerUnavailable { .. } => ErrorKind::PlayerUnavailable,
            DraftError::PickWindowClosed { .. } => ErrorKind::PickWindowClosed,
            DraftError::OutOfRange { .. } => ErrorKind::OutOfRange,
            DraftError::DraftNotActive => ErrorKind::DraftNotActive,
            DraftError::DuplicateQueueEntry { .. } => ErrorKind::DuplicateQueueEntry,
            DraftError::UnknownParticipant { .. } => ErrorKind::UnknownParticipant,
            DraftError::PoolExhausted => ErrorKind::PoolExhausted,
            DraftError::InvalidRoom(_) => ErrorKind::InvalidRoom,
            DraftError::CorruptLog(_) => ErrorKind::CorruptLog,
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Closed set of error classifications carried by outbound `RoomError`
/// events and transport rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotYourTurn,
    PlayerUnavailable,
    PickWindowClosed,
    OutOfRange,
    DraftNotActive,
    DuplicateQueueEntry,
    UnknownParticipant,
    PoolExhausted,
    InvalidRoom,
    CorruptLog,
    Persistence,
    RoomNotFound,
    RoomExists,
    RoomClosed,
    /// A transport frame that could not be parsed as a request.
    InvalidMessage,
}
