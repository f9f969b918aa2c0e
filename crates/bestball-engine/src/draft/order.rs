// Snake draft order: the single source of truth for pick arithmetic.
//
// Everything here is pure and O(1) per call. Odd rounds use the room's base
// participant order, even rounds use its reverse, so the last picker of round
// N picks first in round N+1.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::pick::ParticipantId;
use crate::error::DraftError;

// Raw snake arithmetic. Callers must pass `pick_number`, `round` and `slot`
// already range-checked against a non-empty room; `DraftOrder` does.

/// Round containing `pick_number` (`ceil(pick_number / participant_count)`).
fn round_for(pick_number: u32, participant_count: u32) -> u32 {
    (pick_number - 1) / participant_count + 1
}

/// 1-indexed position of `pick_number` within its round.
fn slot_for(pick_number: u32, participant_count: u32) -> u32 {
    (pick_number - 1) % participant_count + 1
}

/// Overall pick number for a (round, slot) pair, both 1-indexed.
fn pick_number(round: u32, slot: u32, participant_count: u32) -> u32 {
    (round - 1) * participant_count + slot
}

/// Index into the base participant order for `pick_number`.
fn participant_index(pick_number: u32, participant_count: u32) -> usize {
    let round = round_for(pick_number, participant_count);
    let slot = slot_for(pick_number, participant_count);
    if round % 2 == 1 {
        (slot - 1) as usize
    } else {
        (participant_count - slot) as usize
    }
}

/// The snake order of a room: base order plus round count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftOrder {
    participants: Vec<ParticipantId>,
    total_rounds: u32,
    total_picks: u32,
}

impl DraftOrder {
    /// Build an order. Rejects empty rooms, zero rounds, duplicate
    /// participants, and pick counts that do not fit in a `u32`.
    pub fn new(participants: Vec<ParticipantId>, total_rounds: u32) -> Result<Self, DraftError> {
        if participants.is_empty() {
            return Err(DraftError::InvalidRoom("room has no participants".into()));
        }
        if total_rounds == 0 {
            return Err(DraftError::InvalidRoom("room has zero rounds".into()));
        }
        let mut seen = HashSet::new();
        for participant in &participants {
            if !seen.insert(participant.as_str()) {
                return Err(DraftError::InvalidRoom(format!(
                    "participant {participant} is listed twice"
                )));
            }
        }
        let total_picks = u32::try_from(participants.len())
            .ok()
            .and_then(|n| n.checked_mul(total_rounds))
            .ok_or_else(|| DraftError::InvalidRoom("too many picks".into()))?;

        Ok(Self {
            participants,
            total_rounds,
            total_picks,
        })
    }

    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    pub fn participant_count(&self) -> u32 {
        self.participants.len() as u32
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    pub fn total_picks(&self) -> u32 {
        self.total_picks
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.participants.iter().any(|p| p == participant_id)
    }

    /// The participant who owns `pick_number`.
    pub fn participant_at(&self, pick_number: u32) -> Result<&ParticipantId, DraftError> {
        self.check(pick_number)?;
        let idx = participant_index(pick_number, self.participant_count());
        Ok(&self.participants[idx])
    }

    pub fn round_of(&self, pick_number: u32) -> Result<u32, DraftError> {
        self.check(pick_number)?;
        Ok(round_for(pick_number, self.participant_count()))
    }

    pub fn slot_in_round(&self, pick_number: u32) -> Result<u32, DraftError> {
        self.check(pick_number)?;
        Ok(slot_for(pick_number, self.participant_count()))
    }

    /// Overall pick number for a (round, slot) pair in this room.
    pub fn pick_number(&self, round: u32, slot: u32) -> Result<u32, DraftError> {
        let n = self.participant_count();
        if round == 0 || round > self.total_rounds || slot == 0 || slot > n {
            return Err(DraftError::OutOfRange {
                pick_number: 0,
                total_picks: self.total_picks,
            });
        }
        Ok(pick_number(round, slot, n))
    }

    /// Participants in the order they pick during `round`. Empty for rounds
    /// outside the draft.
    pub fn round_sequence(&self, round: u32) -> Vec<&ParticipantId> {
        if round == 0 || round > self.total_rounds {
            return Vec::new();
        }
        if round % 2 == 1 {
            self.participants.iter().collect()
        } else {
            self.participants.iter().rev().collect()
        }
    }

    /// Every pick number owned by `participant_id`, in order.
    pub fn picks_for(&self, participant_id: &str) -> Vec<u32> {
        let Some(base_idx) = self.participants.iter().position(|p| p == participant_id) else {
            return Vec::new();
        };
        let n = self.participant_count();
        (1..=self.total_rounds)
            .map(|round| {
                let slot = if round % 2 == 1 {
                    base_idx as u32 + 1
                } else {
                    n - base_idx as u32
                };
                pick_number(round, slot, n)
            })
            .collect()
    }

    fn check(&self, pick_number: u32) -> Result<(), DraftError> {
        if pick_number == 0 || pick_number > self.total_picks {
            return Err(DraftError::OutOfRange {
                pick_number,
                total_picks: self.total_picks,
            });
        }
        Ok(())
    }
}
