// Pick clock: deadline bookkeeping and the per-room expiration timer.
//
// `ClockState` is plain data owned by the draft state machine. `PickClock`
// is the driver owned by the room actor: it sleeps until the deadline on a
// tokio task and posts exactly one `Expired` message back to the room. The
// sleep is the only suspension point in a room.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

// ---------------------------------------------------------------------------
// ClockState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockStatus {
    Running,
    Expired,
    Cancelled,
}

/// Deadline for one pick. The deadline never changes once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    pub pick_number: u32,
    pub deadline: DateTime<Utc>,
    pub status: ClockStatus,
}

impl ClockState {
    /// A running clock that ends `duration` after `now`, or `None` if that
    /// deadline is not representable.
    pub fn start(pick_number: u32, now: DateTime<Utc>, duration: Duration) -> Option<Self> {
        let duration = chrono::Duration::from_std(duration).ok()?;
        let deadline = now.checked_add_signed(duration)?;
        Some(Self::resume(pick_number, deadline))
    }

    /// A running clock with a deadline fixed earlier.
    pub fn resume(pick_number: u32, deadline: DateTime<Utc>) -> Self {
        Self {
            pick_number,
            deadline,
            status: ClockStatus::Running,
        }
    }

    /// A pick may still be made by hand at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ClockStatus::Running && now < self.deadline
    }

    /// Mark cancelled. Only a running clock can be cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.status != ClockStatus::Running {
            return false;
        }
        self.status = ClockStatus::Cancelled;
        true
    }

    /// Mark expired. Only a running clock can expire.
    pub fn expire(&mut self) -> bool {
        if self.status != ClockStatus::Running {
            return false;
        }
        self.status = ClockStatus::Expired;
        true
    }
}

// ---------------------------------------------------------------------------
// TimeAnchor
// ---------------------------------------------------------------------------

/// Longest a timer is ever scheduled ahead.
pub const MAX_TIMER_OFFSET: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Maps tokio's monotonic clock onto UTC.
///
/// Deadlines are stored as `DateTime<Utc>` so clients can render them, while
/// timers run on tokio time. Anchoring both to one instant keeps them in step,
/// including when a test pauses and advances tokio time.
#[derive(Debug, Clone, Copy)]
pub struct TimeAnchor {
    instant: Instant,
    wall: DateTime<Utc>,
}

impl TimeAnchor {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }

    /// Anchor tokio's current instant to a fixed wall-clock time.
    pub fn at(wall: DateTime<Utc>) -> Self {
        Self {
            instant: Instant::now(),
            wall,
        }
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.instant.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }

    /// The tokio instant corresponding to `at`. Times before the anchor map to
    /// the anchor itself; times too far out to represent clamp to
    /// [`MAX_TIMER_OFFSET`].
    pub fn instant_for(&self, at: DateTime<Utc>) -> Instant {
        let offset = at
            .signed_duration_since(self.wall)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_TIMER_OFFSET);
        self.instant + offset
    }
}

// ---------------------------------------------------------------------------
// PickClock
// ---------------------------------------------------------------------------

/// Identifies one started clock. Generations are unique per `PickClock`, so a
/// late message from an older timer can never be mistaken for the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockHandle {
    pub pick_number: u32,
    pub generation: u64,
    pub deadline: DateTime<Utc>,
}

/// Posted to the room when a started clock reaches its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub pick_number: u32,
    pub generation: u64,
}

/// Timer driver for one room. At most one timer is armed at a time.
pub struct PickClock {
    anchor: TimeAnchor,
    tx: mpsc::Sender<Expired>,
    generation: u64,
    armed: Option<(ClockHandle, JoinHandle<()>)>,
}

impl PickClock {
    pub fn new(anchor: TimeAnchor, tx: mpsc::Sender<Expired>) -> Self {
        Self {
            anchor,
            tx,
            generation: 0,
            armed: None,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.anchor.now_utc()
    }

    /// Start a clock with an explicit deadline. Any previously armed timer is
    /// disarmed first.
    pub fn arm(&mut self, pick_number: u32, deadline: DateTime<Utc>) -> ClockHandle {
        self.disarm();
        self.generation += 1;
        let handle = ClockHandle {
            pick_number,
            generation: self.generation,
            deadline,
        };

        let fire_at = self.anchor.instant_for(deadline);
        let tx = self.tx.clone();
        let expired = Expired {
            pick_number,
            generation: self.generation,
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            // The room may already be gone; nothing to do then.
            let _ = tx.send(expired).await;
        });

        debug!(
            "Clock armed for pick {} (generation {}) until {}",
            pick_number, handle.generation, deadline
        );
        self.armed = Some((handle.clone(), task));
        handle
    }

    /// Disarm whatever timer is running.
    pub fn disarm(&mut self) {
        if let Some((handle, task)) = self.armed.take() {
            task.abort();
            debug!(
                "Clock disarmed for pick {} (generation {})",
                handle.pick_number, handle.generation
            );
        }
    }

    /// The currently armed clock, if any.
    pub fn current(&self) -> Option<&ClockHandle> {
        self.armed.as_ref().map(|(handle, _)| handle)
    }

    /// Whether `expired` came from the currently armed timer. Consumes the
    /// armed slot when it did, so each clock is reported at most once.
    pub fn take_if_current(&mut self, expired: &Expired) -> bool {
        let is_current = self.armed.as_ref().is_some_and(|(handle, _)| {
            handle.generation == expired.generation && handle.pick_number == expired.pick_number
        });
        if is_current {
            self.armed = None;
        }
        is_current
    }
}

impl Drop for PickClock {
    fn drop(&mut self) {
        if let Some((_, task)) = self.armed.take() {
            task.abort();
        }
    }
}
