//! Player and World Entity Definitions
//!
//! The authoritative per-player state mutated by input application and by
//! the simulation tick. Owned by the registry; everything else works on
//! copies or short-lived borrows.

use std::fmt;
use rand::Rng;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::vec2::Vec2;

/// Mass every player spawns with.
pub const DEFAULT_MASS: f64 = 10.0;

/// A split only happens while mass is strictly above this value.
pub const SPLIT_MASS_THRESHOLD: f64 = 5.0;

/// Where new players appear.
pub const SPAWN_POSITION: Vec2 = Vec2::ZERO;

/// Spawn colors are drawn from `0..COLOR_RANGE` (24-bit RGB, exclusive of white).
pub const COLOR_RANGE: u32 = 0xFF_FFFF;

// =============================================================================
// PLAYER ID
// =============================================================================

/// Server-generated, connection-scoped player identifier.
///
/// Equal to the id of the connection that owns the player. Serialized as a
/// hyphenated UUID string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Parse from a UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// First eight hex characters, used for placeholder names and logs.
    pub fn short(&self) -> String {
        let simple = self.0.simple().to_string();
        simple[..8].to_string()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Mutation ability a creature can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    /// Damages players that touch this one.
    Spikes,
    /// Short burst of speed.
    Dash,
    /// Can divide its mass.
    Split,
    /// Absorbs nearby matter passively.
    AutoAbsorb,
}

// =============================================================================
// PLAYER
// =============================================================================

/// State of a single connected player.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Unique player ID (same as the owning connection)
    pub id: PlayerId,

    /// Display name
    pub nickname: String,

    /// Current position
    pub position: Vec2,

    /// Current velocity (world units per second)
    pub velocity: Vec2,

    /// Mass, always strictly positive
    pub mass: f64,

    /// Opaque 24-bit display color
    pub color: u32,

    /// Whether the creature still carries its core
    pub has_core: bool,

    /// Held mutation abilities
    pub mutations: Vec<Mutation>,
}

impl Player {
    /// Create a player with default state.
    pub fn new(id: PlayerId, color: u32) -> Self {
        Self {
            id,
            nickname: placeholder_nickname(&id),
            position: SPAWN_POSITION,
            velocity: Vec2::ZERO,
            mass: DEFAULT_MASS,
            color,
            has_core: true,
            mutations: Vec::new(),
        }
    }

    /// Create a player for a freshly opened connection, drawing its color
    /// from `rng`.
    pub fn spawn(id: PlayerId, rng: &mut impl Rng) -> Self {
        Self::new(id, rng.gen_range(0..COLOR_RANGE))
    }

    /// Check whether a split would change this player's mass.
    #[inline]
    pub fn can_split(&self) -> bool {
        self.mass > SPLIT_MASS_THRESHOLD
    }

    /// Halve mass if above the split threshold. Returns whether it split.
    pub fn split(&mut self) -> bool {
        if self.can_split() {
            self.mass /= 2.0;
            true
        } else {
            false
        }
    }
}

/// Nickname a player carries until it sends a handshake.
pub fn placeholder_nickname(id: &PlayerId) -> String {
    format!("player-{}", id.short())
}

// =============================================================================
// ZONES
// =============================================================================

/// Circular environmental zone.
///
/// Part of the world model and of every snapshot; no zones are spawned yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone identifier
    pub id: String,
    /// Center point
    pub center: Vec2,
    /// Radius in world units
    pub radius: f64,
}
