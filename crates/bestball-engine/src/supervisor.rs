// Room registry and the per-room actor.
//
// Each live room is one tokio task that exclusively owns its
// `DraftStateMachine` and `PickClock`. Callers talk to it through a cloneable
// `RoomHandle` (mpsc requests with oneshot replies) and watch it through a
// broadcast channel of `RoomEvent`s.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::clock::{Expired, PickClock, TimeAnchor};
use crate::db::Database;
use crate::draft::pick::{ParticipantId, PickSource, PlayerId, RoomId};
use crate::draft::room::{RoomConfig, RoomStatus};
use crate::draft::state::{DraftSnapshot, DraftStateMachine};
use crate::error::{DraftError, ErrorKind};
use crate::pool::PlayerPoolProvider;
use crate::protocol::{RoomCommand, RoomEvent};
use crate::queue::{Queue, QueueStoreProvider};

// ---------------------------------------------------------------------------
// Settings & errors
// ---------------------------------------------------------------------------

/// Policies and channel sizes shared by every room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Consecutive expirations after which autodraft is switched on for a
    /// participant. `None` leaves autodraft entirely up to the participant.
    pub missed_picks_before_autodraft: Option<u32>,
    pub inbox_capacity: usize,
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            missed_picks_before_autodraft: None,
            inbox_capacity: 64,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("room {0} already exists")]
    RoomExists(RoomId),

    #[error("room {0} is closed")]
    RoomClosed(RoomId),

    #[error(transparent)]
    Draft(#[from] DraftError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SupervisorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SupervisorError::RoomNotFound(_) => ErrorKind::RoomNotFound,
            SupervisorError::RoomExists(_) => ErrorKind::RoomExists,
            SupervisorError::RoomClosed(_) => ErrorKind::RoomClosed,
            SupervisorError::Draft(e) => e.kind(),
            SupervisorError::Other(_) => ErrorKind::Persistence,
        }
    }
}

/// A room's lifecycle status together with its draft state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub status: RoomStatus,
    pub draft: DraftSnapshot,
}

// ---------------------------------------------------------------------------
// RoomHandle
// ---------------------------------------------------------------------------

enum RoomRequest {
    Command {
        command: RoomCommand,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Watch {
        reply: oneshot::Sender<(RoomSnapshot, broadcast::Receiver<RoomEvent>)>,
    },
    Queue {
        participant_id: ParticipantId,
        reply: oneshot::Sender<Result<Vec<PlayerId>, SupervisorError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable access to one room actor.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    tx: mpsc::Sender<RoomRequest>,
    events: broadcast::Sender<RoomEvent>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Run a command in the room and wait for its outcome.
    pub async fn execute(&self, command: RoomCommand) -> Result<(), SupervisorError> {
        if command.room_id() != self.room_id {
            return Err(SupervisorError::RoomNotFound(command.room_id().to_string()));
        }
        let (reply, rx) = oneshot::channel();
        self.send(RoomRequest::Command { command, reply }).await?;
        rx.await.map_err(|_| self.closed())?
    }

    pub async fn submit_pick(&self, participant_id: &str, player_id: &str) -> Result<(), SupervisorError> {
        self.execute(RoomCommand::SubmitPick {
            room_id: self.room_id.clone(),
            participant_id: participant_id.to_string(),
            player_id: player_id.to_string(),
        })
        .await
    }

    pub async fn toggle_autodraft(&self, participant_id: &str, enabled: bool) -> Result<(), SupervisorError> {
        self.execute(RoomCommand::ToggleAutodraft {
            room_id: self.room_id.clone(),
            participant_id: participant_id.to_string(),
            enabled,
        })
        .await
    }

    pub async fn update_queue(
        &self,
        participant_id: &str,
        player_ids: Vec<PlayerId>,
    ) -> Result<(), SupervisorError> {
        self.execute(RoomCommand::UpdateQueue {
            room_id: self.room_id.clone(),
            participant_id: participant_id.to_string(),
            player_ids,
        })
        .await
    }

    /// The room's current state, served by the actor between commands.
    pub async fn snapshot(&self) -> Result<RoomSnapshot, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomRequest::Snapshot { reply }).await?;
        rx.await.map_err(|_| self.closed())
    }

    /// Receive every event the room emits from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// The room's current state plus a receiver for every event after it.
    /// The actor takes both in one step, so the receiver starts exactly where
    /// the snapshot ends.
    pub async fn watch(&self) -> Result<(RoomSnapshot, broadcast::Receiver<RoomEvent>), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomRequest::Watch { reply }).await?;
        rx.await.map_err(|_| self.closed())
    }

    /// A participant's queue with already drafted players left out.
    pub async fn queue(&self, participant_id: &str) -> Result<Vec<PlayerId>, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomRequest::Queue {
            participant_id: participant_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.closed())?
    }

    async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RoomRequest::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, request: RoomRequest) -> Result<(), SupervisorError> {
        self.tx.send(request).await.map_err(|_| self.closed())
    }

    fn closed(&self) -> SupervisorError {
        SupervisorError::RoomClosed(self.room_id.clone())
    }
}

// ---------------------------------------------------------------------------
// RoomActor
// ---------------------------------------------------------------------------

struct RoomActor {
    room_id: RoomId,
    machine: DraftStateMachine,
    status: RoomStatus,
    clock: PickClock,
    expired_rx: mpsc::Receiver<Expired>,
    inbox: mpsc::Receiver<RoomRequest>,
    events: broadcast::Sender<RoomEvent>,
    db: Arc<Database>,
    queues: Arc<dyn QueueStoreProvider>,
    settings: EngineSettings,
    /// Consecutive expirations per participant since their last human pick.
    missed: HashMap<ParticipantId, u32>,
}

impl RoomActor {
    /// Begin the draft before the actor starts taking requests. A room
    /// recovered with the deadline of its current pick keeps that deadline.
    fn start(&mut self, resume_at: Option<DateTime<Utc>>) {
        if self.machine.is_complete() {
            self.status = RoomStatus::Complete;
            if let Err(e) = self.db.set_room_status(&self.room_id, RoomStatus::Complete) {
                error!("Room {}: failed to mark complete: {:#}", self.room_id, e);
            }
            return;
        }

        let begun = match resume_at {
            Some(deadline) => self.machine.resume(deadline),
            None => self.machine.begin(self.clock.now()),
        };
        let events = match begun {
            Ok(events) => events,
            Err(e) => return self.fail(&e, e.kind()),
        };
        self.status = RoomStatus::Drafting;
        if let Err(e) = self.db.set_room_status(&self.room_id, RoomStatus::Drafting) {
            return self.fail(&format!("{e:#}"), ErrorKind::Persistence);
        }
        if self.commit(events).is_ok() {
            self.drive_autodraft();
        }
    }

    async fn run(mut self) {
        info!("Room {}: actor running ({})", self.room_id, self.status);
        loop {
            tokio::select! {
                request = self.inbox.recv() => match request {
                    Some(RoomRequest::Command { command, reply }) => {
                        let result = self.handle_command(command);
                        let _ = reply.send(result);
                    }
                    Some(RoomRequest::Snapshot { reply }) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(RoomRequest::Watch { reply }) => {
                        let _ = reply.send((self.snapshot(), self.events.subscribe()));
                    }
                    Some(RoomRequest::Queue { participant_id, reply }) => {
                        let _ = reply.send(self.visible_queue(&participant_id));
                    }
                    Some(RoomRequest::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(expired) = self.expired_rx.recv() => self.handle_expired(expired),
            }
        }
        info!("Room {}: actor stopped ({})", self.room_id, self.status);
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            status: self.status,
            draft: self.machine.snapshot(),
        }
    }

    fn handle_command(&mut self, command: RoomCommand) -> Result<(), SupervisorError> {
        if self.status.is_terminal() {
            return Err(SupervisorError::RoomClosed(self.room_id.clone()));
        }

        let result = self.run_command(command);
        if let Err(SupervisorError::Draft(e)) = &result {
            if e.is_fatal() {
                self.fail(e, e.kind());
            }
        }
        result
    }

    fn run_command(&mut self, command: RoomCommand) -> Result<(), SupervisorError> {
        match command {
            RoomCommand::SubmitPick {
                participant_id,
                player_id,
                ..
            } => {
                let events = self
                    .machine
                    .submit_pick(&participant_id, &player_id, self.clock.now())?;
                self.commit(events)?;
                self.drive_autodraft();
                Ok(())
            }
            RoomCommand::ToggleAutodraft {
                participant_id,
                enabled,
                ..
            } => {
                self.machine.set_autodraft(&participant_id, enabled)?;
                self.commit(vec![RoomEvent::AutodraftChanged {
                    room_id: self.room_id.clone(),
                    participant_id: participant_id.clone(),
                    enabled,
                }])?;
                info!(
                    "Room {}: autodraft {} for {}",
                    self.room_id,
                    if enabled { "on" } else { "off" },
                    participant_id
                );
                self.drive_autodraft();
                Ok(())
            }
            RoomCommand::UpdateQueue {
                participant_id,
                player_ids,
                ..
            } => {
                if !self.machine.order().contains(&participant_id) {
                    return Err(DraftError::UnknownParticipant { participant_id }.into());
                }
                if let Some(unknown) = player_ids.iter().find(|id| !self.machine.pool().contains(id)) {
                    return Err(DraftError::PlayerUnavailable {
                        player_id: unknown.clone(),
                    }
                    .into());
                }
                let queue = Queue::new(player_ids)?;
                self.queues
                    .write(&self.room_id, &participant_id, &queue)
                    .map_err(|e| {
                        warn!("Room {}: failed to store queue for {}: {:#}", self.room_id, participant_id, e);
                        SupervisorError::Other(e)
                    })?;
                debug!(
                    "Room {}: {} queued {} players",
                    self.room_id,
                    participant_id,
                    queue.entries().len()
                );
                Ok(())
            }
        }
    }

    fn handle_expired(&mut self, expired: Expired) {
        if !self.clock.take_if_current(&expired) {
            debug!(
                "Room {}: stale expiration for pick {} (generation {})",
                self.room_id, expired.pick_number, expired.generation
            );
            return;
        }
        if self.status.is_terminal() {
            return;
        }

        let Some(participant) = self.machine.on_the_clock().cloned() else {
            return;
        };
        let queue = self.queue_for(&participant);
        match self
            .machine
            .on_clock_expired(expired.pick_number, &queue, self.clock.now())
        {
            Ok(Some(events)) => {
                if self.commit(events).is_err() {
                    return;
                }
                self.record_miss(&participant);
                self.drive_autodraft();
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => self.fail(&e, e.kind()),
            Err(e) => warn!(
                "Room {}: expiration of pick {} ignored: {}",
                self.room_id, expired.pick_number, e
            ),
        }
    }

    /// Count a missed pick and switch autodraft on once the participant hits
    /// the configured threshold.
    fn record_miss(&mut self, participant: &str) {
        let count = self.missed.entry(participant.to_string()).or_insert(0);
        *count += 1;
        let count = *count;

        let Some(threshold) = self.settings.missed_picks_before_autodraft else {
            return;
        };
        if count < threshold || self.machine.is_autodraft(participant) {
            return;
        }
        if self.machine.set_autodraft(participant, true).is_err() {
            return;
        }
        info!(
            "Room {}: {} missed {} picks in a row, enabling autodraft",
            self.room_id, participant, count
        );
        let _ = self.commit(vec![RoomEvent::AutodraftChanged {
            room_id: self.room_id.clone(),
            participant_id: participant.to_string(),
            enabled: true,
        }]);
    }

    /// Commit picks for participants on the clock with autodraft enabled
    /// until someone without it is up or the draft ends.
    fn drive_autodraft(&mut self) {
        while self.status == RoomStatus::Drafting {
            let Some(participant) = self.machine.on_the_clock().cloned() else {
                return;
            };
            if !self.machine.is_autodraft(&participant) {
                return;
            }
            let queue = self.queue_for(&participant);
            match self.machine.autodraft_now(&queue, self.clock.now()) {
                Ok(Some(events)) => {
                    if self.commit(events).is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) if e.is_fatal() => return self.fail(&e, e.kind()),
                Err(e) => {
                    warn!("Room {}: autodraft for {} skipped: {}", self.room_id, participant, e);
                    return;
                }
            }
        }
    }

    /// Persist, then publish, the events produced by a transition. A
    /// persistence failure abandons the room.
    fn commit(&mut self, events: Vec<RoomEvent>) -> Result<(), SupervisorError> {
        for event in events {
            if let Err(e) = self.apply(&event) {
                self.fail(&format!("{e:#}"), ErrorKind::Persistence);
                return Err(e.into());
            }
            // No watchers is fine.
            let _ = self.events.send(event);
        }
        Ok(())
    }

    fn apply(&mut self, event: &RoomEvent) -> anyhow::Result<()> {
        match event {
            RoomEvent::PickCommitted { pick } => {
                self.db.record_pick(&self.room_id, pick)?;
                if pick.source == PickSource::Human {
                    self.missed.remove(&pick.participant_id);
                }
            }
            RoomEvent::ClockStarted {
                pick_number,
                deadline,
                ..
            } => {
                self.db.save_clock(&self.room_id, *pick_number, *deadline)?;
                self.clock.arm(*pick_number, *deadline);
            }
            RoomEvent::AutodraftChanged {
                participant_id,
                enabled,
                ..
            } => {
                self.db.save_autodraft(&self.room_id, participant_id, *enabled)?;
                if !enabled {
                    self.missed.remove(participant_id);
                }
            }
            RoomEvent::DraftComplete { .. } => {
                self.clock.disarm();
                self.status = RoomStatus::Complete;
                self.db.set_room_status(&self.room_id, RoomStatus::Complete)?;
            }
            RoomEvent::RoomError { .. } => {}
        }
        Ok(())
    }

    fn visible_queue(&self, participant_id: &str) -> Result<Vec<PlayerId>, SupervisorError> {
        if !self.machine.order().contains(participant_id) {
            return Err(DraftError::UnknownParticipant {
                participant_id: participant_id.to_string(),
            }
            .into());
        }
        let queue = Queue::new(self.queues.read(&self.room_id, participant_id)?)?;
        Ok(queue.visible(self.machine.available()))
    }

    fn queue_for(&self, participant: &str) -> Vec<PlayerId> {
        match self.queues.read(&self.room_id, participant) {
            Ok(queue) => queue,
            Err(e) => {
                warn!(
                    "Room {}: could not read queue for {}, using rankings: {:#}",
                    self.room_id, participant, e
                );
                Vec::new()
            }
        }
    }

    /// Abandon the room after a broken invariant or failed write.
    fn fail(&mut self, reason: &dyn Display, kind: ErrorKind) {
        error!("Room {}: abandoning draft: {}", self.room_id, reason);
        self.clock.disarm();
        self.status = RoomStatus::Abandoned;
        if let Err(e) = self.db.set_room_status(&self.room_id, RoomStatus::Abandoned) {
            error!("Room {}: failed to record abandonment: {:#}", self.room_id, e);
        }
        let _ = self.events.send(RoomEvent::RoomError {
            room_id: self.room_id.clone(),
            kind,
        });
    }

    fn shutdown(&mut self) {
        self.clock.disarm();
        if !self.status.is_terminal() {
            self.status = RoomStatus::Abandoned;
            if let Err(e) = self.db.set_room_status(&self.room_id, RoomStatus::Abandoned) {
                error!("Room {}: failed to record shutdown: {:#}", self.room_id, e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RoomSupervisor
// ---------------------------------------------------------------------------

/// Registry of live rooms.
pub struct RoomSupervisor {
    db: Arc<Database>,
    pool_provider: Arc<dyn PlayerPoolProvider>,
    queues: Arc<dyn QueueStoreProvider>,
    settings: EngineSettings,
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
}

impl RoomSupervisor {
    pub fn new(
        db: Arc<Database>,
        pool_provider: Arc<dyn PlayerPoolProvider>,
        queues: Arc<dyn QueueStoreProvider>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            db,
            pool_provider,
            queues,
            settings,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<RoomId, RoomHandle>> {
        self.rooms.lock().expect("room registry mutex poisoned")
    }

    /// Create a room, persist it, and start its draft.
    pub async fn start_room(&self, config: RoomConfig) -> Result<RoomHandle, SupervisorError> {
        let room_id = config.room_id.clone();
        if self.rooms().contains_key(&room_id) || self.db.room_exists(&room_id)? {
            return Err(SupervisorError::RoomExists(room_id));
        }

        let players = self.pool_provider.list_available(&room_id).await?;
        let machine = DraftStateMachine::new(config.clone(), players.clone())?;
        if !self.db.create_room(&config, &players)? {
            return Err(SupervisorError::RoomExists(room_id));
        }

        info!(
            "Starting room {} with {} participants, {} rounds, {}s per pick",
            room_id,
            config.participants.len(),
            config.total_rounds,
            config.pick_seconds
        );
        Ok(self.launch(machine, None))
    }

    /// Rebuild and resume every room left `scheduled` or `drafting` in the
    /// database. A room that cannot be loaded or replayed is marked abandoned
    /// and the rest still recover. Returns the ids of the resumed rooms.
    pub fn recover(&self) -> Result<Vec<RoomId>, SupervisorError> {
        let room_ids = self
            .db
            .load_room_ids(&[RoomStatus::Scheduled, RoomStatus::Drafting])?;

        let mut recovered = Vec::new();
        for room_id in room_ids {
            if self.rooms().contains_key(&room_id) {
                continue;
            }
            match self.recover_room(&room_id) {
                Ok(pick_count) => {
                    info!("Recovered room {} at {} picks", room_id, pick_count);
                    recovered.push(room_id);
                }
                Err(e) => {
                    error!("Cannot recover room {}: {:#}", room_id, e);
                    if let Err(e) = self.db.set_room_status(&room_id, RoomStatus::Abandoned) {
                        error!("Room {}: failed to record abandonment: {:#}", room_id, e);
                    }
                }
            }
        }
        Ok(recovered)
    }

    fn recover_room(&self, room_id: &str) -> anyhow::Result<usize> {
        let room = self
            .db
            .load_room(room_id)?
            .with_context(|| format!("room {room_id} disappeared during recovery"))?;
        let picks = self.db.load_picks(room_id)?;
        let flags = self.db.load_autodraft(room_id)?;
        let pick_count = picks.len();

        let machine = DraftStateMachine::restore(room.config, room.players, picks, &flags)?;
        let resume_at = room
            .clock
            .filter(|clock| clock.pick_number as usize == pick_count + 1)
            .map(|clock| clock.deadline);
        self.launch(machine, resume_at);
        Ok(pick_count)
    }

    fn launch(&self, machine: DraftStateMachine, resume_at: Option<DateTime<Utc>>) -> RoomHandle {
        let room_id = machine.config().room_id.clone();
        let (tx, inbox) = mpsc::channel(self.settings.inbox_capacity);
        let (events, _) = broadcast::channel(self.settings.event_capacity);
        let (expired_tx, expired_rx) = mpsc::channel(4);

        let mut actor = RoomActor {
            room_id: room_id.clone(),
            machine,
            status: RoomStatus::Scheduled,
            clock: PickClock::new(TimeAnchor::now(), expired_tx),
            expired_rx,
            inbox,
            events: events.clone(),
            db: Arc::clone(&self.db),
            queues: Arc::clone(&self.queues),
            settings: self.settings.clone(),
            missed: HashMap::new(),
        };
        actor.start(resume_at);
        tokio::spawn(actor.run());

        let handle = RoomHandle {
            room_id: room_id.clone(),
            tx,
            events,
        };
        self.rooms().insert(room_id, handle.clone());
        handle
    }

    pub fn get_room(&self, room_id: &str) -> Result<RoomHandle, SupervisorError> {
        self.rooms()
            .get(room_id)
            .cloned()
            .ok_or_else(|| SupervisorError::RoomNotFound(room_id.to_string()))
    }

    /// Route a command to the room it names.
    pub async fn execute(&self, command: RoomCommand) -> Result<(), SupervisorError> {
        self.get_room(command.room_id())?.execute(command).await
    }

    /// Stop a room's actor, drop it from the registry, and discard its
    /// queues. A room still drafting is recorded as abandoned.
    pub async fn end_room(&self, room_id: &str) -> Result<(), SupervisorError> {
        let handle = self
            .rooms()
            .remove(room_id)
            .ok_or_else(|| SupervisorError::RoomNotFound(room_id.to_string()))?;
        handle.shutdown().await;
        if let Err(e) = self.queues.discard_room(room_id) {
            warn!("Room {}: failed to discard queues: {:#}", room_id, e);
        }
        info!("Room {} ended", room_id);
        Ok(())
    }

    /// Ids of every room in the registry, sorted.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}
