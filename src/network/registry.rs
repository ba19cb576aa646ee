//! Player Registry
//!
//! The authoritative map of connected players, shared by every connection
//! task and the simulation loop.
//!
//! One `RwLock` guards membership, every player's fields and the tick
//! counter together, so a snapshot and its recipient list always come from
//! a single consistent read. No encoding or I/O happens under the lock.

use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::game::input::{InputOutcome, PlayerInput};
use crate::game::snapshot::{now_millis, WorldSnapshot};
use crate::game::state::{Player, PlayerId, Zone};
use crate::game::tick::{self, TickResult};
use crate::network::connection::PeerLink;

/// Registry errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The player left before the mutation landed.
    #[error("player {0} is no longer registered")]
    StaleMutation(PlayerId),
}

/// A registered player and the link its snapshots go out on.
#[derive(Debug)]
struct Entry {
    player: Player,
    link: PeerLink,
}

#[derive(Debug, Default)]
struct World {
    players: BTreeMap<PlayerId, Entry>,
    zones: Vec<Zone>,
    tick: u64,
}

impl World {
    fn capture(&self) -> WorldSnapshot {
        WorldSnapshot::capture(
            self.players.values().map(|e| &e.player),
            &self.zones,
            self.tick,
            now_millis(),
        )
    }

    fn recipients(&self) -> Vec<PeerLink> {
        self.players.values().map(|e| e.link.clone()).collect()
    }
}

/// Output of one simulated tick.
#[derive(Debug)]
pub struct TickOutput {
    /// Post-integration world state.
    pub snapshot: WorldSnapshot,
    /// Links of exactly the players in `snapshot`.
    pub recipients: Vec<PeerLink>,
    /// Per-player integration results.
    pub result: TickResult,
}

/// Concurrency-safe store of connected players.
#[derive(Debug, Default)]
pub struct Registry {
    world: RwLock<World>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a player, replacing any entry with the same id.
    ///
    /// Returns a snapshot taken under the same lock, including the new player,
    /// so the connection has state before the next tick.
    pub async fn register(&self, player: Player, link: PeerLink) -> WorldSnapshot {
        let id = player.id;
        let mut world = self.world.write().await;
        if world.players.insert(id, Entry { player, link }).is_some() {
            debug!(player = %id, "re-registered, previous entry replaced");
        }
        world.capture()
    }

    /// Remove a player. Returns whether it was present.
    pub async fn unregister(&self, id: &PlayerId) -> bool {
        self.world.write().await.players.remove(id).is_some()
    }

    /// Consistent copy of the current world.
    pub async fn snapshot(&self) -> WorldSnapshot {
        self.world.read().await.capture()
    }

    /// Snapshot plus the links of exactly the players it contains.
    pub async fn capture(&self) -> (WorldSnapshot, Vec<PeerLink>) {
        let world = self.world.read().await;
        (world.capture(), world.recipients())
    }

    /// Apply a decoded input to a registered player.
    pub async fn apply_input(
        &self,
        id: &PlayerId,
        input: &PlayerInput,
        speed: f64,
    ) -> Result<InputOutcome, RegistryError> {
        let mut world = self.world.write().await;
        let entry = world
            .players
            .get_mut(id)
            .ok_or(RegistryError::StaleMutation(*id))?;
        Ok(crate::game::input::apply(&mut entry.player, input, speed))
    }

    /// Run one tick: bump the counter, integrate every player, and capture
    /// the resulting snapshot and recipients, all under one write lock.
    pub async fn advance(&self, dt: f64) -> TickOutput {
        let mut world = self.world.write().await;
        world.tick += 1;

        let tick_number = world.tick;
        let result = tick::tick(
            tick_number,
            world.players.values_mut().map(|e| &mut e.player),
            dt,
        );
        trace!(tick = tick_number, players = world.players.len(), "tick integrated");

        TickOutput {
            snapshot: world.capture(),
            recipients: world.recipients(),
            result,
        }
    }

    /// Number of registered players.
    pub async fn len(&self) -> usize {
        self.world.read().await.players.len()
    }

    /// True when no player is registered.
    pub async fn is_empty(&self) -> bool {
        self.world.read().await.players.is_empty()
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: &PlayerId) -> bool {
        self.world.read().await.players.contains_key(id)
    }

    /// Copy of one player's state.
    pub async fn player(&self, id: &PlayerId) -> Option<Player> {
        self.world.read().await.players.get(id).map(|e| e.player.clone())
    }

    /// Last completed tick.
    pub async fn current_tick(&self) -> u64 {
        self.world.read().await.tick
    }
}
