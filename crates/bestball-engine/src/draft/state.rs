// Draft state machine: current pick pointer, available pool, pick history.
//
// All transitions are synchronous and take the current time as an argument.
// Every successful pick, human or automatic, goes through `commit`, which is
// the only place that cancels the clock and advances the pointer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::autodraft;
use super::order::DraftOrder;
use super::pick::{ParticipantId, Pick, PickSource, PlayerId, RoomId};
use super::room::{RoomConfig, MAX_PICK_SECONDS};
use crate::clock::ClockState;
use crate::error::DraftError;
use crate::pool::{AvailablePool, Player, PlayerPool};
use crate::protocol::RoomEvent;

/// Where the draft currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum DraftPhase {
    Idle,
    AwaitingPick { pick_number: u32 },
    Complete,
}

/// Everything a client needs to resynchronize after (re)joining a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub room_id: RoomId,
    pub participants: Vec<ParticipantId>,
    pub total_rounds: u32,
    pub total_picks: u32,
    pub phase: DraftPhase,
    /// Owner of the pick currently awaited, if any.
    pub on_the_clock: Option<ParticipantId>,
    pub clock: Option<ClockState>,
    pub picks: Vec<Pick>,
    /// Available player ids in rank order.
    pub available: Vec<PlayerId>,
    pub autodraft: BTreeMap<ParticipantId, bool>,
}

/// The state of one room's draft.
#[derive(Debug, Clone)]
pub struct DraftStateMachine {
    config: RoomConfig,
    order: DraftOrder,
    pool: PlayerPool,
    available: AvailablePool,
    picks: Vec<Pick>,
    phase: DraftPhase,
    clock: Option<ClockState>,
    autodraft: BTreeMap<ParticipantId, bool>,
}

impl DraftStateMachine {
    /// Create an idle machine for a room.
    ///
    /// Fails with `InvalidRoom` for empty rooms, zero rounds, a pick duration
    /// of zero or above [`MAX_PICK_SECONDS`], or a pool too small to fill
    /// every pick.
    pub fn new(config: RoomConfig, players: Vec<Player>) -> Result<Self, DraftError> {
        let order = DraftOrder::new(config.participants.clone(), config.total_rounds)?;
        if config.pick_seconds == 0 {
            return Err(DraftError::InvalidRoom("pick duration is zero".into()));
        }
        if config.pick_seconds > MAX_PICK_SECONDS {
            return Err(DraftError::InvalidRoom(format!(
                "pick duration of {}s exceeds the {MAX_PICK_SECONDS}s limit",
                config.pick_seconds
            )));
        }
        let pool = PlayerPool::new(players)?;
        if pool.len() < order.total_picks() as usize {
            return Err(DraftError::InvalidRoom(format!(
                "pool has {} players but the draft needs {}",
                pool.len(),
                order.total_picks()
            )));
        }

        let available = AvailablePool::new(&pool);
        let autodraft = order
            .participants()
            .iter()
            .map(|p| (p.clone(), false))
            .collect();

        Ok(Self {
            config,
            order,
            pool,
            available,
            picks: Vec::new(),
            phase: DraftPhase::Idle,
            clock: None,
            autodraft,
        })
    }

    /// Rebuild a machine from a persisted pick log.
    ///
    /// Every pick is checked against the snake order and the pool, so a log
    /// with gaps, wrong owners, or double-drafted players is rejected with
    /// `CorruptLog`. The result is `Idle` (or `Complete`); call
    /// [`resume`](Self::resume) with the persisted deadline, or
    /// [`begin`](Self::begin) when none was stored.
    pub fn restore(
        config: RoomConfig,
        players: Vec<Player>,
        picks: Vec<Pick>,
        autodraft: &BTreeMap<ParticipantId, bool>,
    ) -> Result<Self, DraftError> {
        let mut machine = Self::new(config, players)?;

        for (participant, &enabled) in autodraft {
            match machine.autodraft.get_mut(participant) {
                Some(flag) => *flag = enabled,
                None => warn!(
                    "Ignoring autodraft flag for unknown participant {} in room {}",
                    participant, machine.config.room_id
                ),
            }
        }

        for (i, pick) in picks.into_iter().enumerate() {
            let expected = i as u32 + 1;
            if pick.pick_number != expected {
                return Err(DraftError::CorruptLog(format!(
                    "expected pick {expected}, found pick {}",
                    pick.pick_number
                )));
            }
            let owner = machine.order.participant_at(expected).map_err(|_| {
                DraftError::CorruptLog(format!("pick {expected} is past the end of the draft"))
            })?;
            if *owner != pick.participant_id {
                return Err(DraftError::CorruptLog(format!(
                    "pick {expected} belongs to {owner}, log says {}",
                    pick.participant_id
                )));
            }
            if pick.round != machine.order.round_of(expected)?
                || pick.slot_in_round != machine.order.slot_in_round(expected)?
            {
                return Err(DraftError::CorruptLog(format!(
                    "pick {expected} has round/slot {}/{}",
                    pick.round, pick.slot_in_round
                )));
            }
            let Some(player_id) = pick.player_id.as_deref() else {
                return Err(DraftError::CorruptLog(format!("pick {expected} has no player")));
            };
            if !machine.available.remove(player_id) {
                return Err(DraftError::CorruptLog(format!(
                    "player {player_id} in pick {expected} was not available"
                )));
            }
            machine.picks.push(pick);
        }

        if machine.picks.len() == machine.order.total_picks() as usize {
            machine.phase = DraftPhase::Complete;
        }
        Ok(machine)
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Start (or resume) the draft: `Idle -> AwaitingPick`, starting the clock
    /// for the next pick.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<Vec<RoomEvent>, DraftError> {
        if self.phase != DraftPhase::Idle {
            return Err(DraftError::DraftNotActive);
        }
        let next = self.picks.len() as u32 + 1;
        info!(
            "Room {}: draft starting at pick {} of {}",
            self.config.room_id,
            next,
            self.order.total_picks()
        );
        let event = self.start_clock(next, now)?;
        self.phase = DraftPhase::AwaitingPick { pick_number: next };
        Ok(vec![event])
    }

    /// Resume a restored draft with the deadline its next pick already had.
    /// A deadline in the past leaves the window closed, so only the
    /// expiration path can fill the pick.
    pub fn resume(&mut self, deadline: DateTime<Utc>) -> Result<Vec<RoomEvent>, DraftError> {
        if self.phase != DraftPhase::Idle {
            return Err(DraftError::DraftNotActive);
        }
        let next = self.picks.len() as u32 + 1;
        let participant_id = self.order.participant_at(next)?.clone();
        info!(
            "Room {}: draft resuming at pick {} with deadline {}",
            self.config.room_id, next, deadline
        );
        self.clock = Some(ClockState::resume(next, deadline));
        self.phase = DraftPhase::AwaitingPick { pick_number: next };
        Ok(vec![RoomEvent::ClockStarted {
            pick_number: next,
            participant_id,
            deadline,
        }])
    }

    /// A human pick.
    ///
    /// Checked in order: the draft is awaiting a pick, the participant is in
    /// the room and owns it, the clock is still open at `now`, and the player
    /// is available. Any failure leaves the state untouched.
    pub fn submit_pick(
        &mut self,
        participant_id: &str,
        player_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoomEvent>, DraftError> {
        let pick_number = self.awaiting()?;
        if !self.order.contains(participant_id) {
            return Err(DraftError::UnknownParticipant {
                participant_id: participant_id.to_string(),
            });
        }
        let owner = self.order.participant_at(pick_number)?;
        if owner != participant_id {
            return Err(DraftError::NotYourTurn {
                pick_number,
                expected: owner.clone(),
                actual: participant_id.to_string(),
            });
        }
        let window_open = self
            .clock
            .as_ref()
            .is_some_and(|c| c.pick_number == pick_number && c.is_open_at(now));
        if !window_open {
            return Err(DraftError::PickWindowClosed { pick_number });
        }
        if !self.available.contains(player_id) {
            return Err(DraftError::PlayerUnavailable {
                player_id: player_id.to_string(),
            });
        }

        self.commit(pick_number, player_id.to_string(), PickSource::Human, now)
    }

    /// The clock for `pick_number` ran out.
    ///
    /// Returns `Ok(None)` for a stale expiration: a different pick is awaited,
    /// or the clock was already cancelled by a commit. Otherwise autodrafts
    /// from `queue` and commits with `source = autodraft`.
    pub fn on_clock_expired(
        &mut self,
        pick_number: u32,
        queue: &[PlayerId],
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<RoomEvent>>, DraftError> {
        if self.current_pick() != Some(pick_number) {
            debug!(
                "Room {}: ignoring expiration for pick {}",
                self.config.room_id, pick_number
            );
            return Ok(None);
        }
        let expired = match self.clock.as_mut() {
            Some(clock) if clock.pick_number == pick_number => clock.expire(),
            _ => false,
        };
        if !expired {
            return Ok(None);
        }

        let participant = self.order.participant_at(pick_number)?.clone();
        let player_id = autodraft::select_for(&participant, &self.available, queue)?;
        info!(
            "Room {}: pick {} expired for {}, autodrafting {}",
            self.config.room_id, pick_number, participant, player_id
        );
        self.commit(pick_number, player_id, PickSource::Autodraft, now)
            .map(Some)
    }

    /// Commit immediately for the participant on the clock if they have
    /// autodraft enabled. Returns `Ok(None)` when there is nothing to do.
    pub fn autodraft_now(
        &mut self,
        queue: &[PlayerId],
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<RoomEvent>>, DraftError> {
        let Some(pick_number) = self.current_pick() else {
            return Ok(None);
        };
        let participant = self.order.participant_at(pick_number)?.clone();
        if !self.is_autodraft(&participant) {
            return Ok(None);
        }
        let running = self
            .clock
            .as_ref()
            .is_some_and(|c| c.pick_number == pick_number && c.is_open_at(now));
        if !running {
            // The expiration path owns this pick now.
            return Ok(None);
        }

        let player_id = autodraft::select_for(&participant, &self.available, queue)?;
        self.commit(pick_number, player_id, PickSource::Autodraft, now)
            .map(Some)
    }

    pub fn set_autodraft(&mut self, participant_id: &str, enabled: bool) -> Result<(), DraftError> {
        let flag = self.autodraft.get_mut(participant_id).ok_or_else(|| {
            DraftError::UnknownParticipant {
                participant_id: participant_id.to_string(),
            }
        })?;
        *flag = enabled;
        Ok(())
    }

    fn awaiting(&self) -> Result<u32, DraftError> {
        self.current_pick().ok_or(DraftError::DraftNotActive)
    }

    /// Append a pick, shrink the pool, cancel the clock, and advance.
    fn commit(
        &mut self,
        pick_number: u32,
        player_id: PlayerId,
        source: PickSource,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoomEvent>, DraftError> {
        let participant_id = self.order.participant_at(pick_number)?.clone();
        let round = self.order.round_of(pick_number)?;
        let slot_in_round = self.order.slot_in_round(pick_number)?;
        if !self.available.remove(&player_id) {
            return Err(DraftError::PlayerUnavailable { player_id });
        }
        if let Some(clock) = self.clock.as_mut() {
            clock.cancel();
        }

        let pick = Pick {
            pick_number,
            round,
            slot_in_round,
            participant_id,
            player_id: Some(player_id),
            committed_at: now,
            source,
        };
        info!(
            "Room {}: pick {} (round {}, slot {}) -> {} takes {:?} [{}]",
            self.config.room_id,
            pick.pick_number,
            pick.round,
            pick.slot_in_round,
            pick.participant_id,
            pick.player_id,
            pick.source
        );
        self.picks.push(pick.clone());

        let mut events = vec![RoomEvent::PickCommitted { pick }];
        if pick_number == self.order.total_picks() {
            self.phase = DraftPhase::Complete;
            info!("Room {}: draft complete", self.config.room_id);
            events.push(RoomEvent::DraftComplete {
                room_id: self.config.room_id.clone(),
            });
        } else {
            let next = pick_number + 1;
            self.phase = DraftPhase::AwaitingPick { pick_number: next };
            events.push(self.start_clock(next, now)?);
        }
        Ok(events)
    }

    fn start_clock(&mut self, pick_number: u32, now: DateTime<Utc>) -> Result<RoomEvent, DraftError> {
        let participant_id = self.order.participant_at(pick_number)?.clone();
        let clock = ClockState::start(pick_number, now, self.config.pick_duration())
            .ok_or_else(|| {
                DraftError::InvalidRoom(format!(
                    "deadline for pick {pick_number} is out of range"
                ))
            })?;
        let event = RoomEvent::ClockStarted {
            pick_number,
            participant_id,
            deadline: clock.deadline,
        };
        self.clock = Some(clock);
        Ok(event)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn order(&self) -> &DraftOrder {
        &self.order
    }

    pub fn pool(&self) -> &PlayerPool {
        &self.pool
    }

    pub fn available(&self) -> &AvailablePool {
        &self.available
    }

    pub fn picks(&self) -> &[Pick] {
        &self.picks
    }

    pub fn phase(&self) -> DraftPhase {
        self.phase
    }

    pub fn clock(&self) -> Option<&ClockState> {
        self.clock.as_ref()
    }

    pub fn current_pick(&self) -> Option<u32> {
        match self.phase {
            DraftPhase::AwaitingPick { pick_number } => Some(pick_number),
            _ => None,
        }
    }

    pub fn on_the_clock(&self) -> Option<&ParticipantId> {
        self.current_pick()
            .and_then(|p| self.order.participant_at(p).ok())
    }

    pub fn is_autodraft(&self, participant_id: &str) -> bool {
        self.autodraft.get(participant_id).copied().unwrap_or(false)
    }

    pub fn autodraft_flags(&self) -> &BTreeMap<ParticipantId, bool> {
        &self.autodraft
    }

    pub fn is_complete(&self) -> bool {
        self.phase == DraftPhase::Complete
    }

    /// Full reconstructable state. A pure read.
    pub fn snapshot(&self) -> DraftSnapshot {
        DraftSnapshot {
            room_id: self.config.room_id.clone(),
            participants: self.order.participants().to_vec(),
            total_rounds: self.order.total_rounds(),
            total_picks: self.order.total_picks(),
            phase: self.phase,
            on_the_clock: self.on_the_clock().cloned(),
            clock: self.clock.clone(),
            picks: self.picks.clone(),
            available: self.available.ranked_ids(),
            autodraft: self.autodraft.clone(),
        }
    }
}
