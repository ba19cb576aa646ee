//! # Petri Game Server
//!
//! Authoritative real-time world-synchronization server for Petri.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PETRI SERVER                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  └── vec2.rs     - 2D vector                                 │
//! │                                                              │
//! │  game/           - World rules (no I/O)                      │
//! │  ├── state.rs    - Players, ids, zones                       │
//! │  ├── input.rs    - Applying client input                     │
//! │  ├── tick.rs     - Kinematic integration                     │
//! │  └── snapshot.rs - Immutable world snapshots                 │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── protocol.rs - JSON wire format                          │
//! │  ├── connection.rs - Connection lifecycle, outbound queue    │
//! │  ├── registry.rs - Shared player registry                    │
//! │  ├── broadcast.rs- Snapshot fan-out                          │
//! │  └── server.rs   - WebSocket gateway and simulation loop     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! Membership, player fields and the tick counter sit behind one lock.
//! Every snapshot is taken under that lock, so it never mixes state from
//! before and after a concurrent join, leave or input.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::vec2::Vec2;
pub use game::state::{Player, PlayerId};
pub use game::snapshot::WorldSnapshot;
pub use network::server::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 20;

/// Simulation tick period in milliseconds
pub const TICK_PERIOD_MS: u64 = 1000 / TICK_RATE as u64;
