//! Input Application
//!
//! Turns a decoded client message into effects on a player.
//!
//! - Directional flags set the velocity *intent*; position is only ever
//!   advanced by the simulation tick.
//! - Split is instantaneous and applied on arrival.
//! - Nicknames change only when the message carries one.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::state::Player;

/// Longest nickname kept, in characters.
pub const MAX_NICKNAME_CHARS: usize = 24;

// =============================================================================
// INPUT TYPES
// =============================================================================

/// Held-control state carried by an input message.
///
/// Replaces the player's previous control state wholesale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controls {
    /// Move toward -Y
    pub up: bool,
    /// Move toward +Y
    pub down: bool,
    /// Move toward -X
    pub left: bool,
    /// Move toward +X
    pub right: bool,
    /// Split this frame
    pub split: bool,
}

impl Controls {
    /// Unit-per-axis direction from the held flags.
    ///
    /// Flags add per axis, so opposing flags cancel to zero on that axis.
    pub fn direction(&self) -> Vec2 {
        let axis = |neg: bool, pos: bool| (pos as i8 - neg as i8) as f64;
        Vec2::new(axis(self.left, self.right), axis(self.up, self.down))
    }
}

/// A validated inbound message, ready to apply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerInput {
    /// New nickname, already validated.
    pub nickname: Option<String>,
    /// New control state, if the message carried any control flag.
    pub controls: Option<Controls>,
}

impl PlayerInput {
    /// Build from raw message parts, validating the nickname.
    pub fn new(nickname: Option<&str>, controls: Option<Controls>) -> Self {
        Self {
            nickname: nickname.and_then(sanitize_nickname),
            controls,
        }
    }

    /// An input carrying nothing to apply (a `{}` keepalive).
    pub fn is_keepalive(&self) -> bool {
        self.nickname.is_none() && self.controls.is_none()
    }
}

/// What applying an input changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputOutcome {
    /// Nickname was replaced.
    pub renamed: bool,
    /// Velocity intent was replaced.
    pub steered: bool,
    /// Mass was halved.
    pub split: bool,
}

// =============================================================================
// APPLICATION
// =============================================================================

/// Apply an input to a player.
///
/// `speed` is the per-axis speed in world units per second.
pub fn apply(player: &mut Player, input: &PlayerInput, speed: f64) -> InputOutcome {
    let mut outcome = InputOutcome::default();

    if let Some(nickname) = &input.nickname {
        player.nickname = nickname.clone();
        outcome.renamed = true;
    }

    if let Some(controls) = &input.controls {
        player.velocity = controls.direction() * speed;
        outcome.steered = true;

        if controls.split {
            outcome.split = player.split();
        }
    }

    outcome
}

/// Normalize a client-supplied nickname.
///
/// Trims whitespace, drops control characters and caps the length.
/// Returns `None` when nothing printable is left.
pub fn sanitize_nickname(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NICKNAME_CHARS)
        .collect();
    let cleaned = cleaned.trim_end().to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{PlayerId, DEFAULT_MASS};

    const SPEED: f64 = 100.0;

    fn test_player() -> Player {
        Player::new(PlayerId::from_bytes([1; 16]), 0xff00ff)
    }

    fn controls(up: bool, down: bool, left: bool, right: bool) -> Controls {
        Controls { up, down, left, right, split: false }
    }

    #[test]
    fn test_direction_single_flags() {
        assert_eq!(controls(true, false, false, false).direction(), Vec2::UP);
        assert_eq!(controls(false, true, false, false).direction(), Vec2::DOWN);
        assert_eq!(controls(false, false, true, false).direction(), Vec2::LEFT);
        assert_eq!(controls(false, false, false, true).direction(), Vec2::RIGHT);
    }

    #[test]
    fn test_direction_diagonal_is_additive() {
        let dir = controls(true, false, false, true).direction();
        assert_eq!(dir, Vec2::new(1.0, -1.0));
    }

    #[test]
    fn test_opposing_flags_cancel() {
        let vertical = controls(true, true, false, false).direction();
        assert_eq!(vertical.y, 0.0);

        let horizontal = controls(false, false, true, true).direction();
        assert_eq!(horizontal.x, 0.0);

        let all = controls(true, true, true, true).direction();
        assert_eq!(all, Vec2::ZERO);

        // Cancelling one axis leaves the other intact
        let mixed = controls(true, true, false, true).direction();
        assert_eq!(mixed, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn test_apply_sets_velocity_not_position() {
        let mut player = test_player();
        let input = PlayerInput::new(None, Some(controls(false, false, false, true)));

        let outcome = apply(&mut player, &input, SPEED);

        assert!(outcome.steered);
        assert_eq!(player.velocity, Vec2::new(SPEED, 0.0));
        assert_eq!(player.position, Vec2::ZERO);
    }

    #[test]
    fn test_idle_controls_stop_player() {
        let mut player = test_player();
        player.velocity = Vec2::new(SPEED, SPEED);

        apply(&mut player, &PlayerInput::new(None, Some(Controls::default())), SPEED);
        assert_eq!(player.velocity, Vec2::ZERO);
    }

    #[test]
    fn test_keepalive_changes_nothing() {
        let mut player = test_player();
        player.velocity = Vec2::new(0.0, SPEED);
        let before = player.clone();

        let input = PlayerInput::new(None, None);
        assert!(input.is_keepalive());

        let outcome = apply(&mut player, &input, SPEED);
        assert_eq!(outcome, InputOutcome::default());
        assert_eq!(player, before);
    }

    #[test]
    fn test_nickname_only_when_present() {
        let mut player = test_player();
        let original = player.nickname.clone();

        apply(&mut player, &PlayerInput::new(None, Some(Controls::default())), SPEED);
        assert_eq!(player.nickname, original);

        let outcome = apply(&mut player, &PlayerInput::new(Some("alice"), None), SPEED);
        assert!(outcome.renamed);
        assert!(!outcome.steered);
        assert_eq!(player.nickname, "alice");
    }

    #[test]
    fn test_split_flag() {
        let mut player = test_player();
        let split = Controls { split: true, ..Controls::default() };
        let input = PlayerInput::new(None, Some(split));

        assert!(apply(&mut player, &input, SPEED).split);
        assert_eq!(player.mass, DEFAULT_MASS / 2.0);

        // At the threshold: no-op
        assert!(!apply(&mut player, &input, SPEED).split);
        assert_eq!(player.mass, DEFAULT_MASS / 2.0);
    }

    #[test]
    fn test_split_with_movement() {
        let mut player = test_player();
        let input = PlayerInput::new(
            None,
            Some(Controls { left: true, split: true, ..Controls::default() }),
        );

        let outcome = apply(&mut player, &input, SPEED);
        assert!(outcome.split);
        assert!(outcome.steered);
        assert_eq!(player.velocity, Vec2::new(-SPEED, 0.0));
        assert_eq!(player.mass, 5.0);
    }

    #[test]
    fn test_sanitize_nickname() {
        assert_eq!(sanitize_nickname("  alice "), Some("alice".to_string()));
        assert_eq!(sanitize_nickname("bo\u{7}b"), Some("bob".to_string()));
        assert_eq!(sanitize_nickname("   "), None);
        assert_eq!(sanitize_nickname(""), None);

        let long = "x".repeat(100);
        assert_eq!(sanitize_nickname(&long).unwrap().chars().count(), MAX_NICKNAME_CHARS);
    }

    #[test]
    fn test_blank_nickname_is_ignored() {
        let mut player = test_player();
        let original = player.nickname.clone();

        let input = PlayerInput::new(Some("  "), None);
        assert!(input.is_keepalive());

        apply(&mut player, &input, SPEED);
        assert_eq!(player.nickname, original);
    }
}
