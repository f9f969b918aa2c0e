// Inbound commands and outbound events at the engine boundary.
//
// Both sets are closed, tagged enums so every handler matches exhaustively
// and the JSON form carries an explicit `type` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::draft::pick::{ParticipantId, Pick, PlayerId, RoomId};
use crate::error::ErrorKind;

/// Commands a participant can send to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomCommand {
    SubmitPick {
        room_id: RoomId,
        participant_id: ParticipantId,
        player_id: PlayerId,
    },
    ToggleAutodraft {
        room_id: RoomId,
        participant_id: ParticipantId,
        enabled: bool,
    },
    UpdateQueue {
        room_id: RoomId,
        participant_id: ParticipantId,
        player_ids: Vec<PlayerId>,
    },
}

impl RoomCommand {
    pub fn room_id(&self) -> &str {
        match self {
            RoomCommand::SubmitPick { room_id, .. }
            | RoomCommand::ToggleAutodraft { room_id, .. }
            | RoomCommand::UpdateQueue { room_id, .. } => room_id,
        }
    }
}

/// Events broadcast to everyone watching a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    PickCommitted {
        pick: Pick,
    },
    ClockStarted {
        pick_number: u32,
        participant_id: ParticipantId,
        deadline: DateTime<Utc>,
    },
    /// A participant's autodraft flag was set, by the participant or by the
    /// missed-pick policy.
    AutodraftChanged {
        room_id: RoomId,
        participant_id: ParticipantId,
        enabled: bool,
    },
    DraftComplete {
        room_id: RoomId,
    },
    RoomError {
        room_id: RoomId,
        kind: ErrorKind,
    },
}
