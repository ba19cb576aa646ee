//! Simulation Tick
//!
//! Kinematic integration run once per tick over every registered player.
//! Velocity is set by input application; only this module moves players.

use std::time::Duration;

use crate::core::vec2::Vec2;
use crate::game::state::{Player, PlayerId};

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Tick number that was just simulated.
    pub tick: u64,
    /// Players integrated successfully.
    pub integrated: usize,
    /// Players whose integration failed and was contained.
    pub contained: Vec<(PlayerId, IntegrationError)>,
}

/// Per-player integration failure.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum IntegrationError {
    /// Integration would have produced a NaN or infinite position.
    #[error("non-finite position {attempted:?} (velocity {velocity:?})")]
    NonFinite {
        /// Position the step would have produced.
        attempted: Vec2,
        /// Velocity at the time of the step.
        velocity: Vec2,
    },
}

/// Tick length as seconds, for integration.
#[inline]
pub fn delta_seconds(period: Duration) -> f64 {
    period.as_secs_f64()
}

/// Advance one player: `position += velocity * dt`.
///
/// On a non-finite result the player keeps its last finite position and is
/// stopped, so one bad entity cannot poison later ticks.
pub fn integrate(player: &mut Player, dt: f64) -> Result<(), IntegrationError> {
    let next = player.position + player.velocity * dt;

    if !next.is_finite() {
        let err = IntegrationError::NonFinite {
            attempted: next,
            velocity: player.velocity,
        };
        player.velocity = Vec2::ZERO;
        return Err(err);
    }

    player.position = next;
    Ok(())
}

/// Run one simulation tick over `players`.
///
/// A failing player is recorded in the result; the remaining players are
/// still integrated.
pub fn tick<'a>(
    tick: u64,
    players: impl IntoIterator<Item = &'a mut Player>,
    dt: f64,
) -> TickResult {
    let mut result = TickResult {
        tick,
        ..TickResult::default()
    };

    for player in players {
        match integrate(player, dt) {
            Ok(()) => result.integrated += 1,
            Err(e) => result.contained.push((player.id, e)),
        }
    }

    result
}
