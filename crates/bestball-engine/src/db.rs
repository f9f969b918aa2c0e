// SQLite persistence for rooms, pick logs, autodraft flags, and queues.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::draft::pick::{ParticipantId, Pick, PickSource, PlayerId, RoomId};
use crate::draft::room::{RoomConfig, RoomStatus};
use crate::pool::Player;
use crate::queue::{Queue, QueueStoreProvider};

/// A room as persisted: its configuration, the player pool it was started
/// with, its last known status, and the clock of the pick it was awaiting.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRoom {
    pub config: RoomConfig,
    pub players: Vec<Player>,
    pub status: RoomStatus,
    pub clock: Option<StoredClock>,
}

/// The last deadline handed out for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredClock {
    pub pick_number: u32,
    pub deadline: DateTime<Utc>,
}

/// SQLite-backed persistence shared by every room in the process.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral database in tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS rooms (
                room_id    TEXT PRIMARY KEY,
                config     TEXT NOT NULL,
                players    TEXT NOT NULL,
                status     TEXT NOT NULL,
                clock_pick     INTEGER,
                clock_deadline TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS draft_picks (
                room_id        TEXT NOT NULL REFERENCES rooms(room_id),
                pick_number    INTEGER NOT NULL,
                round          INTEGER NOT NULL,
                slot_in_round  INTEGER NOT NULL,
                participant_id TEXT NOT NULL,
                player_id      TEXT,
                committed_at   TEXT NOT NULL,
                source         TEXT NOT NULL,
                PRIMARY KEY (room_id, pick_number),
                UNIQUE (room_id, player_id)
            );

            CREATE TABLE IF NOT EXISTS autodraft (
                room_id        TEXT NOT NULL REFERENCES rooms(room_id),
                participant_id TEXT NOT NULL,
                enabled        INTEGER NOT NULL,
                PRIMARY KEY (room_id, participant_id)
            );

            CREATE TABLE IF NOT EXISTS queues (
                room_id        TEXT NOT NULL,
                participant_id TEXT NOT NULL,
                player_ids     TEXT NOT NULL,
                PRIMARY KEY (room_id, participant_id)
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned, which only happens if another thread
    /// panicked while holding it.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    /// Insert a new room. Returns `false`, leaving the stored room alone, if
    /// the room id is already taken.
    pub fn create_room(&self, config: &RoomConfig, players: &[Player]) -> Result<bool> {
        let conn = self.conn();
        let config_json = serde_json::to_string(config).context("failed to serialize room config")?;
        let players_json = serde_json::to_string(players).context("failed to serialize players")?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO rooms (room_id, config, players, status)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    config.room_id,
                    config_json,
                    players_json,
                    RoomStatus::Scheduled.as_str()
                ],
            )
            .with_context(|| format!("failed to create room {}", config.room_id))?;
        Ok(inserted == 1)
    }

    pub fn room_exists(&self, room_id: &str) -> Result<bool> {
        let conn = self.conn();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM rooms WHERE room_id = ?1)",
                params![room_id],
                |row| row.get(0),
            )
            .context("failed to check room existence")?;
        Ok(exists)
    }

    pub fn set_room_status(&self, room_id: &str, status: RoomStatus) -> Result<()> {
        let conn = self.conn();
        let updated = conn
            .execute(
                "UPDATE rooms
                 SET status = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE room_id = ?1",
                params![room_id, status.as_str()],
            )
            .context("failed to update room status")?;
        if updated == 0 {
            bail!("room {room_id} does not exist");
        }
        Ok(())
    }

    pub fn load_room(&self, room_id: &str) -> Result<Option<StoredRoom>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT config, players, status, clock_pick, clock_deadline
                 FROM rooms WHERE room_id = ?1",
                params![room_id],
                |row| {
                    Ok(RoomRow {
                        config: row.get(0)?,
                        players: row.get(1)?,
                        status: row.get(2)?,
                        clock_pick: row.get(3)?,
                        clock_deadline: row.get(4)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to query room {room_id}"))?;

        row.map(|row| row.decode(room_id)).transpose()
    }

    /// Ids of every room whose status is one of `statuses`, ordered by room
    /// id. Only the id and status columns are read, so a room with an
    /// undecodable config is still listed.
    pub fn load_room_ids(&self, statuses: &[RoomStatus]) -> Result<Vec<RoomId>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT room_id, status FROM rooms ORDER BY room_id")
            .context("failed to prepare load_room_ids query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("failed to query rooms")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map room rows")?;

        Ok(rows
            .into_iter()
            .filter(|(_, status)| statuses.iter().any(|s| s.as_str() == status))
            .map(|(room_id, _)| room_id)
            .collect())
    }

    /// Remember the deadline just given to `pick_number`.
    pub fn save_clock(&self, room_id: &str, pick_number: u32, deadline: DateTime<Utc>) -> Result<()> {
        let conn = self.conn();
        let updated = conn
            .execute(
                "UPDATE rooms SET clock_pick = ?2, clock_deadline = ?3 WHERE room_id = ?1",
                params![room_id, pick_number, deadline.to_rfc3339()],
            )
            .context("failed to save pick clock")?;
        if updated == 0 {
            bail!("room {room_id} does not exist");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pick log
    // ------------------------------------------------------------------

    /// Append a committed pick.
    ///
    /// Re-recording an identical pick is a no-op and returns `false`. A pick
    /// whose number or player collides with a different stored pick is an
    /// error: the log and the in-memory room have diverged.
    pub fn record_pick(&self, room_id: &str, pick: &Pick) -> Result<bool> {
        let conn = self.conn();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO draft_picks
                    (room_id, pick_number, round, slot_in_round, participant_id, player_id, committed_at, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    room_id,
                    pick.pick_number,
                    pick.round,
                    pick.slot_in_round,
                    pick.participant_id,
                    pick.player_id,
                    pick.committed_at.to_rfc3339(),
                    pick.source.as_str(),
                ],
            )
            .context("failed to record draft pick")?;
        if inserted == 1 {
            return Ok(true);
        }

        let stored: Option<Option<PlayerId>> = conn
            .query_row(
                "SELECT player_id FROM draft_picks WHERE room_id = ?1 AND pick_number = ?2",
                params![room_id, pick.pick_number],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read back conflicting pick")?;
        match stored {
            Some(player_id) if player_id == pick.player_id => Ok(false),
            Some(player_id) => bail!(
                "pick {} in room {room_id} is already stored with player {:?}",
                pick.pick_number,
                player_id
            ),
            None => bail!(
                "player {:?} is already drafted in room {room_id}",
                pick.player_id
            ),
        }
    }

    /// The pick log for a room, ordered by pick number.
    pub fn load_picks(&self, room_id: &str) -> Result<Vec<Pick>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT pick_number, round, slot_in_round, participant_id, player_id, committed_at, source
                 FROM draft_picks WHERE room_id = ?1 ORDER BY pick_number",
            )
            .context("failed to prepare load_picks query")?;

        let rows = stmt
            .query_map(params![room_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("failed to query draft picks")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map draft pick rows")?;

        rows.into_iter()
            .map(
                |(pick_number, round, slot_in_round, participant_id, player_id, committed_at, source)| {
                    let committed_at = DateTime::parse_from_rfc3339(&committed_at)
                        .with_context(|| format!("bad timestamp on pick {pick_number}"))?
                        .with_timezone(&Utc);
                    let source = PickSource::from_str_source(&source)
                        .with_context(|| format!("unknown pick source {source:?}"))?;
                    Ok(Pick {
                        pick_number,
                        round,
                        slot_in_round,
                        participant_id,
                        player_id,
                        committed_at,
                        source,
                    })
                },
            )
            .collect()
    }

    pub fn pick_count(&self, room_id: &str) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM draft_picks WHERE room_id = ?1",
                params![room_id],
                |row| row.get(0),
            )
            .context("failed to count draft picks")?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Autodraft flags
    // ------------------------------------------------------------------

    pub fn save_autodraft(&self, room_id: &str, participant_id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR REPLACE INTO autodraft (room_id, participant_id, enabled) VALUES (?1, ?2, ?3)",
            params![room_id, participant_id, enabled],
        )
        .context("failed to save autodraft flag")?;
        Ok(())
    }

    pub fn load_autodraft(&self, room_id: &str) -> Result<BTreeMap<ParticipantId, bool>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT participant_id, enabled FROM autodraft WHERE room_id = ?1")
            .context("failed to prepare load_autodraft query")?;
        let flags = stmt
            .query_map(params![room_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })
            .context("failed to query autodraft flags")?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()
            .context("failed to map autodraft rows")?;
        Ok(flags)
    }
}

/// Raw columns of one `rooms` row.
struct RoomRow {
    config: String,
    players: String,
    status: String,
    clock_pick: Option<u32>,
    clock_deadline: Option<String>,
}

impl RoomRow {
    fn decode(self, room_id: &str) -> Result<StoredRoom> {
        let config: RoomConfig = serde_json::from_str(&self.config)
            .with_context(|| format!("failed to deserialize config for room {room_id}"))?;
        let players: Vec<Player> = serde_json::from_str(&self.players)
            .with_context(|| format!("failed to deserialize players for room {room_id}"))?;
        let status = RoomStatus::from_str_status(&self.status)
            .with_context(|| format!("unknown status {:?} for room {room_id}", self.status))?;
        let clock = match (self.clock_pick, self.clock_deadline) {
            (Some(pick_number), Some(deadline)) => {
                let deadline = DateTime::parse_from_rfc3339(&deadline)
                    .with_context(|| format!("bad clock deadline for room {room_id}"))?
                    .with_timezone(&Utc);
                Some(StoredClock {
                    pick_number,
                    deadline,
                })
            }
            _ => None,
        };
        Ok(StoredRoom {
            config,
            players,
            status,
            clock,
        })
    }
}

// ---------------------------------------------------------------------------
// Queue store
// ---------------------------------------------------------------------------

impl QueueStoreProvider for Database {
    fn read(&self, room_id: &str, participant_id: &str) -> Result<Vec<PlayerId>> {
        let conn = self.conn();
        let json: Option<String> = conn
            .query_row(
                "SELECT player_ids FROM queues WHERE room_id = ?1 AND participant_id = ?2",
                params![room_id, participant_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query queue")?;
        match json {
            Some(json) => serde_json::from_str(&json).context("failed to deserialize queue"),
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, room_id: &str, participant_id: &str, queue: &Queue) -> Result<()> {
        let conn = self.conn();
        let json = serde_json::to_string(queue.entries()).context("failed to serialize queue")?;
        conn.execute(
            "INSERT OR REPLACE INTO queues (room_id, participant_id, player_ids) VALUES (?1, ?2, ?3)",
            params![room_id, participant_id, json],
        )
        .context("failed to save queue")?;
        Ok(())
    }

    fn discard_room(&self, room_id: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM queues WHERE room_id = ?1", params![room_id])
            .context("failed to discard room queues")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn sample_config(room_id: &str) -> RoomConfig {
        RoomConfig {
            room_id: room_id.to_string(),
            participants: vec!["alice".into(), "bob".into()],
            total_rounds: 2,
            pick_seconds: 30,
        }
    }

    fn sample_players() -> Vec<Player> {
        (1..=6)
            .map(|i| Player {
                id: format!("p{i}"),
                name: format!("Player {i}"),
                position: "RB".into(),
                team: if i % 2 == 0 { Some("KC".into()) } else { None },
                adp: i as f64 * 1.5,
            })
            .collect()
    }

    fn sample_pick(pick_number: u32, participant: &str, player: &str) -> Pick {
        Pick {
            pick_number,
            round: 1,
            slot_in_round: pick_number,
            participant_id: participant.into(),
            player_id: Some(player.into()),
            committed_at: Utc.with_ymd_and_hms(2025, 8, 1, 20, 0, pick_number).unwrap(),
            source: PickSource::Human,
        }
    }

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(tables, vec!["autodraft", "draft_picks", "queues", "rooms"]);
    }

    #[test]
    fn create_and_load_room() {
        let db = test_db();
        db.create_room(&sample_config("r1"), &sample_players()).unwrap();

        assert!(db.room_exists("r1").unwrap());
        assert!(!db.room_exists("r2").unwrap());

        let room = db.load_room("r1").unwrap().unwrap();
        assert_eq!(room.config, sample_config("r1"));
        assert_eq!(room.players, sample_players());
        assert_eq!(room.status, RoomStatus::Scheduled);
        assert_eq!(room.clock, None);
        assert!(db.load_room("missing").unwrap().is_none());
    }

    #[test]
    fn duplicate_room_is_rejected() {
        let db = test_db();
        assert!(db.create_room(&sample_config("r1"), &sample_players()).unwrap());
        db.set_room_status("r1", RoomStatus::Drafting).unwrap();

        let mut other = sample_config("r1");
        other.total_rounds = 3;
        assert!(!db.create_room(&other, &sample_players()).unwrap());
        let stored = db.load_room("r1").unwrap().unwrap();
        assert_eq!(stored.config, sample_config("r1"));
        assert_eq!(stored.status, RoomStatus::Drafting);
    }

    #[test]
    fn clock_round_trip() {
        let db = test_db();
        db.create_room(&sample_config("r1"), &sample_players()).unwrap();
        let deadline = Utc.with_ymd_and_hms(2025, 8, 1, 20, 0, 30).unwrap()
            + chrono::Duration::microseconds(123_456);
        db.save_clock("r1", 1, deadline).unwrap();
        db.save_clock("r1", 2, deadline + chrono::Duration::seconds(30)).unwrap();

        let room = db.load_room("r1").unwrap().unwrap();
        assert_eq!(
            room.clock,
            Some(StoredClock {
                pick_number: 2,
                deadline: deadline + chrono::Duration::seconds(30),
            })
        );
        assert!(db.save_clock("missing", 1, deadline).is_err());
    }

    #[test]
    fn load_room_ids_filters_by_status() {
        let db = test_db();
        for id in ["a", "b", "c", "d"] {
            db.create_room(&sample_config(id), &sample_players()).unwrap();
        }
        db.set_room_status("a", RoomStatus::Drafting).unwrap();
        db.set_room_status("b", RoomStatus::Complete).unwrap();
        db.conn()
            .execute("UPDATE rooms SET config = '{not json' WHERE room_id = 'd'", [])
            .unwrap();

        let live = db
            .load_room_ids(&[RoomStatus::Scheduled, RoomStatus::Drafting])
            .unwrap();
        assert_eq!(live, vec!["a", "c", "d"]);

        // The broken row only fails when it is decoded.
        assert!(db.load_room("d").is_err());
        assert!(db.load_room("c").unwrap().is_some());

        assert!(db.set_room_status("zzz", RoomStatus::Complete).is_err());
    }

    #[test]
    fn record_and_load_picks() {
        let db = test_db();
        db.create_room(&sample_config("r1"), &sample_players()).unwrap();

        let mut second = sample_pick(2, "bob", "p1");
        second.source = PickSource::Autodraft;
        assert!(db.record_pick("r1", &second).unwrap());
        assert!(db.record_pick("r1", &sample_pick(1, "alice", "p3")).unwrap());

        let picks = db.load_picks("r1").unwrap();
        assert_eq!(picks, vec![sample_pick(1, "alice", "p3"), second]);
        assert_eq!(db.pick_count("r1").unwrap(), 2);
        assert!(db.load_picks("other").unwrap().is_empty());
    }

    #[test]
    fn record_pick_is_idempotent() {
        let db = test_db();
        db.create_room(&sample_config("r1"), &sample_players()).unwrap();
        let pick = sample_pick(1, "alice", "p3");
        assert!(db.record_pick("r1", &pick).unwrap());
        assert!(!db.record_pick("r1", &pick).unwrap());
        assert_eq!(db.pick_count("r1").unwrap(), 1);
    }

    #[test]
    fn record_pick_rejects_conflicts() {
        let db = test_db();
        db.create_room(&sample_config("r1"), &sample_players()).unwrap();
        db.record_pick("r1", &sample_pick(1, "alice", "p3")).unwrap();

        // Same pick number, different player.
        assert!(db.record_pick("r1", &sample_pick(1, "alice", "p4")).is_err());
        // Same player, different pick number.
        assert!(db.record_pick("r1", &sample_pick(2, "bob", "p3")).is_err());
        assert_eq!(db.pick_count("r1").unwrap(), 1);
    }

    #[test]
    fn autodraft_flags_round_trip() {
        let db = test_db();
        db.create_room(&sample_config("r1"), &sample_players()).unwrap();
        db.save_autodraft("r1", "alice", true).unwrap();
        db.save_autodraft("r1", "bob", true).unwrap();
        db.save_autodraft("r1", "bob", false).unwrap();

        let flags = db.load_autodraft("r1").unwrap();
        assert_eq!(flags.get("alice"), Some(&true));
        assert_eq!(flags.get("bob"), Some(&false));
        assert!(db.load_autodraft("r2").unwrap().is_empty());
    }

    #[test]
    fn queue_store_reads_writes_and_discards() {
        let db = test_db();
        let queue = Queue::new(vec!["p2".into(), "p5".into()]).unwrap();
        db.write("r1", "alice", &queue).unwrap();
        db.write("r2", "alice", &Queue::new(vec!["p1".into()]).unwrap()).unwrap();

        assert_eq!(db.read("r1", "alice").unwrap(), vec!["p2", "p5"]);
        assert!(db.read("r1", "bob").unwrap().is_empty());

        db.discard_room("r1").unwrap();
        assert!(db.read("r1", "alice").unwrap().is_empty());
        assert_eq!(db.read("r2", "alice").unwrap(), vec!["p1"]);
    }
}
