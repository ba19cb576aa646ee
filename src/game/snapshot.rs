//! World Snapshots
//!
//! Immutable, point-in-time projections of the world sent to every client.
//! Field names match the wire format exactly.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::state::{Mutation, Player, PlayerId, Zone};

/// Read-only projection of a [`Player`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Player identifier.
    pub id: PlayerId,
    /// Display name.
    pub nickname: String,
    /// Position X.
    pub x: f64,
    /// Position Y.
    pub y: f64,
    /// Current mass.
    pub mass: f64,
    /// 24-bit display color.
    pub color: u32,
    /// Core flag.
    pub has_core: bool,
    /// Held mutations (omitted when empty).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutations: Vec<Mutation>,
}

impl From<&Player> for PlayerState {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id,
            nickname: p.nickname.clone(),
            x: p.position.x,
            y: p.position.y,
            mass: p.mass,
            color: p.color,
            has_core: p.has_core,
            mutations: p.mutations.clone(),
        }
    }
}

/// Read-only projection of a [`Zone`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneState {
    /// Zone identifier.
    pub id: String,
    /// Center point, sent as `{"x": .., "y": ..}`.
    pub center: Vec2,
    /// Radius.
    pub radius: f64,
}

impl From<&Zone> for ZoneState {
    fn from(z: &Zone) -> Self {
        Self {
            id: z.id.clone(),
            center: z.center,
            radius: z.radius,
        }
    }
}

/// Full world state at one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Every registered player, in id order.
    pub players: Vec<PlayerState>,
    /// Environmental zones.
    pub zones: Vec<ZoneState>,
    /// Monotonic tick counter.
    pub tick: u64,
    /// Wall-clock time of capture (Unix milliseconds).
    pub time: i64,
}

impl WorldSnapshot {
    /// Build a snapshot from borrowed world contents.
    pub fn capture<'a>(
        players: impl IntoIterator<Item = &'a Player>,
        zones: &[Zone],
        tick: u64,
        time: i64,
    ) -> Self {
        Self {
            players: players.into_iter().map(PlayerState::from).collect(),
            zones: zones.iter().map(ZoneState::from).collect(),
            tick,
            time,
        }
    }

    /// Look up a player by id.
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == *id)
    }

    /// Look up a player by nickname.
    pub fn player_named(&self, nickname: &str) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.nickname == nickname)
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
