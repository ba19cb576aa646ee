//! Game Logic Module
//!
//! Pure world logic with no I/O.
//!
//! ## Module Structure
//!
//! - `state`: Player, ids, zones, spawn defaults
//! - `input`: Applying client input to a player
//! - `tick`: Per-tick kinematic integration
//! - `snapshot`: Immutable world snapshots

pub mod input;
pub mod state;
pub mod tick;
pub mod snapshot;

// Re-export key types
pub use input::{Controls, PlayerInput, InputOutcome};
pub use state::{Player, PlayerId, Mutation, Zone};
pub use tick::{TickResult, IntegrationError};
pub use snapshot::{WorldSnapshot, PlayerState, ZoneState};
