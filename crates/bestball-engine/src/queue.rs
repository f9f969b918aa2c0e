// Per-participant draft queues and the stores that hold them.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;

use crate::draft::pick::{ParticipantId, PlayerId, RoomId};
use crate::error::DraftError;
use crate::pool::AvailablePool;

/// An ordered list of players a participant would like drafted.
///
/// Duplicates are rejected on construction. Players drafted by someone else
/// stay in the stored list and are filtered out at read time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Queue {
    entries: Vec<PlayerId>,
}

impl Queue {
    pub fn new(entries: Vec<PlayerId>) -> Result<Self, DraftError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for id in &entries {
            if !seen.insert(id.as_str()) {
                return Err(DraftError::DuplicateQueueEntry {
                    player_id: id.clone(),
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PlayerId] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries that are still draftable, in queue order.
    pub fn visible(&self, available: &AvailablePool) -> Vec<PlayerId> {
        self.entries
            .iter()
            .filter(|id| available.contains(id))
            .cloned()
            .collect()
    }
}

/// Storage for queues. Each entry is written only on behalf of its owning
/// participant; the draft engine only ever reads.
pub trait QueueStoreProvider: Send + Sync {
    /// The stored queue, or an empty list if the participant never set one.
    fn read(&self, room_id: &str, participant_id: &str) -> Result<Vec<PlayerId>>;

    fn write(&self, room_id: &str, participant_id: &str, queue: &Queue) -> Result<()>;

    /// Drop every queue belonging to a room.
    fn discard_room(&self, room_id: &str) -> Result<()>;
}

/// Process-local queue store.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    queues: RwLock<HashMap<(RoomId, ParticipantId), Vec<PlayerId>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, HashMap<(RoomId, ParticipantId), Vec<PlayerId>>> {
        self.queues.read().expect("queue store lock poisoned")
    }

    fn write_guard(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<(RoomId, ParticipantId), Vec<PlayerId>>> {
        self.queues.write().expect("queue store lock poisoned")
    }
}

impl QueueStoreProvider for MemoryQueueStore {
    fn read(&self, room_id: &str, participant_id: &str) -> Result<Vec<PlayerId>> {
        Ok(self
            .read_guard()
            .get(&(room_id.to_string(), participant_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn write(&self, room_id: &str, participant_id: &str, queue: &Queue) -> Result<()> {
        self.write_guard().insert(
            (room_id.to_string(), participant_id.to_string()),
            queue.entries().to_vec(),
        );
        Ok(())
    }

    fn discard_room(&self, room_id: &str) -> Result<()> {
        self.write_guard().retain(|(room, _), _| room != room_id);
        Ok(())
    }
}
