// Automatic player selection for participants who miss their window or have
// autodraft turned on.

use tracing::debug;

use super::pick::PlayerId;
use crate::error::DraftError;
use crate::pool::AvailablePool;

/// Pick a player on behalf of `participant_id`.
///
/// The first queue entry still in `available` wins. With an empty or fully
/// drafted queue, falls back to the lowest-ADP available player (ties broken
/// by player id). Fails with `PoolExhausted` only if nothing is left.
pub fn select_for(
    participant_id: &str,
    available: &AvailablePool,
    queue: &[PlayerId],
) -> Result<PlayerId, DraftError> {
    if let Some(id) = queue.iter().find(|id| available.contains(id)) {
        debug!("Autodraft for {participant_id}: queued player {id}");
        return Ok(id.clone());
    }

    match available.best() {
        Some(id) => {
            debug!("Autodraft for {participant_id}: best available {id}");
            Ok(id.clone())
        }
        None => Err(DraftError::PoolExhausted),
    }
}
