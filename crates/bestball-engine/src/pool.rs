// Player catalog, available-player set, and player pool providers.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::draft::pick::PlayerId;
use crate::error::DraftError;

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// A draftable player with ranking metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    /// Position label as published by the ranking source (e.g. "WR", "QB").
    pub position: String,
    /// NFL team abbreviation, if known.
    #[serde(default)]
    pub team: Option<String>,
    /// Average draft position. Lower is better.
    pub adp: f64,
}

/// Ranking comparison used everywhere a "best available" player is needed:
/// lowest ADP first, ties broken by player id so replays stay deterministic.
pub fn compare_rank(a: &Player, b: &Player) -> Ordering {
    a.adp.total_cmp(&b.adp).then_with(|| a.id.cmp(&b.id))
}

// ---------------------------------------------------------------------------
// PlayerPool
// ---------------------------------------------------------------------------

/// The immutable catalog of players for one draft, kept in ADP rank order.
#[derive(Debug, Clone)]
pub struct PlayerPool {
    ranked: Vec<Player>,
    index: HashMap<PlayerId, usize>,
}

impl PlayerPool {
    /// Build a catalog. Duplicate ids and non-finite ADP values are rejected.
    pub fn new(mut players: Vec<Player>) -> Result<Self, DraftError> {
        if let Some(bad) = players.iter().find(|p| !p.adp.is_finite()) {
            return Err(DraftError::InvalidRoom(format!(
                "player {} has a non-finite ADP",
                bad.id
            )));
        }
        players.sort_by(compare_rank);

        let mut index = HashMap::with_capacity(players.len());
        for (i, player) in players.iter().enumerate() {
            if index.insert(player.id.clone(), i).is_some() {
                return Err(DraftError::InvalidRoom(format!(
                    "player {} is listed twice",
                    player.id
                )));
            }
        }
        Ok(Self {
            ranked: players,
            index,
        })
    }

    pub fn get(&self, player_id: &str) -> Option<&Player> {
        self.index.get(player_id).map(|&i| &self.ranked[i])
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.index.contains_key(player_id)
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// Players in rank order (lowest ADP first).
    pub fn ranked(&self) -> &[Player] {
        &self.ranked
    }
}

// ---------------------------------------------------------------------------
// AvailablePool
// ---------------------------------------------------------------------------

/// The players of a room not yet present in any committed pick.
///
/// Only ever shrinks: there is no way to put a player back.
#[derive(Debug, Clone)]
pub struct AvailablePool {
    /// All player ids in rank order; drafted ones are skipped on read.
    ranked: Vec<PlayerId>,
    remaining: HashSet<PlayerId>,
    /// Index into `ranked` before which every player has been drafted.
    head: usize,
}

impl AvailablePool {
    pub fn new(pool: &PlayerPool) -> Self {
        let ranked: Vec<PlayerId> = pool.ranked().iter().map(|p| p.id.clone()).collect();
        let remaining = ranked.iter().cloned().collect();
        Self {
            ranked,
            remaining,
            head: 0,
        }
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.remaining.contains(player_id)
    }

    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Remove a drafted player. Returns `false` if it was not available.
    pub fn remove(&mut self, player_id: &str) -> bool {
        if !self.remaining.remove(player_id) {
            return false;
        }
        while self
            .ranked
            .get(self.head)
            .is_some_and(|id| !self.remaining.contains(id))
        {
            self.head += 1;
        }
        true
    }

    /// The highest-ranked (lowest ADP) player still available.
    pub fn best(&self) -> Option<&PlayerId> {
        self.ranked[self.head..]
            .iter()
            .find(|id| self.remaining.contains(*id))
    }

    /// Available player ids in rank order.
    pub fn ranked_ids(&self) -> Vec<PlayerId> {
        self.ranked[self.head..]
            .iter()
            .filter(|id| self.remaining.contains(*id))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Source of the player pool for a room, read once when the room starts.
#[async_trait]
pub trait PlayerPoolProvider: Send + Sync {
    async fn list_available(&self, room_id: &str) -> Result<Vec<Player>>;
}

/// A fixed in-memory pool shared by every room.
#[derive(Debug, Clone, Default)]
pub struct StaticPlayerPool {
    players: Vec<Player>,
}

impl StaticPlayerPool {
    pub fn new(players: Vec<Player>) -> Self {
        Self { players }
    }
}

#[async_trait]
impl PlayerPoolProvider for StaticPlayerPool {
    async fn list_available(&self, _room_id: &str) -> Result<Vec<Player>> {
        Ok(self.players.clone())
    }
}

/// Raw CSV row: `id,name,position,team,adp`.
#[derive(Debug, Deserialize)]
struct PlayerRow {
    id: String,
    name: String,
    position: String,
    #[serde(default)]
    team: Option<String>,
    adp: f64,
}

/// Load a player pool from a CSV file with an `id,name,position,team,adp`
/// header. Empty team cells become `None`.
pub fn load_players_csv(path: &Path) -> Result<Vec<Player>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open player pool {}", path.display()))?;

    let mut players = Vec::new();
    for (line, row) in reader.deserialize::<PlayerRow>().enumerate() {
        let row = row.with_context(|| {
            format!("failed to parse row {} of {}", line + 2, path.display())
        })?;
        players.push(Player {
            id: row.id.trim().to_string(),
            name: row.name.trim().to_string(),
            position: row.position.trim().to_uppercase(),
            team: row
                .team
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            adp: row.adp,
        });
    }

    // Reject broken files up front rather than at room start.
    PlayerPool::new(players.clone())
        .with_context(|| format!("invalid player pool {}", path.display()))?;

    info!("Loaded {} players from {}", players.len(), path.display());
    Ok(players)
}

/// A pool read from a CSV file once at startup and shared by every room.
#[derive(Debug, Clone)]
pub struct CsvPlayerPool {
    players: Vec<Player>,
}

impl CsvPlayerPool {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            players: load_players_csv(path)?,
        })
    }
}

#[async_trait]
impl PlayerPoolProvider for CsvPlayerPool {
    async fn list_available(&self, _room_id: &str) -> Result<Vec<Player>> {
        Ok(self.players.clone())
    }
}
