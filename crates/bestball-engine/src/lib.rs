// Library root: the snake-draft scheduling and state engine. Re-exports all
// modules so integration tests and the server crate can reach the public API.

pub mod clock;
pub mod db;
pub mod draft;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod queue;
pub mod supervisor;
