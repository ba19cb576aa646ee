//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a bare JSON object with no type tag:
//!
//! | Direction | Shape |
//! |---|---|
//! | client → server | `{"nick": "alice"}` handshake |
//! | client → server | `{"up": true, "down": false, "left": false, "right": false, "split": false}` input |
//! | client → server | `{}` keepalive |
//! | server → client | `{"players": [...], "zones": [...], "tick": 1, "time": 1700000000000}` |

use std::sync::Arc;
use serde::{Serialize, Deserialize};

use crate::game::input::{Controls, PlayerInput};
use crate::game::snapshot::WorldSnapshot;

/// Largest inbound text frame accepted, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// An encoded outbound frame, shared by every recipient of one broadcast.
pub type Frame = Arc<str>;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Message sent from client to server.
///
/// Handshake, input and keepalive share one shape; which one a message is
/// depends on the fields present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Requested nickname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    /// Move up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<bool>,
    /// Move down.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<bool>,
    /// Move left.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<bool>,
    /// Move right.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<bool>,
    /// Split this frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<bool>,
}

impl ClientMessage {
    /// Handshake carrying a nickname.
    pub fn handshake(nick: impl Into<String>) -> Self {
        Self {
            nick: Some(nick.into()),
            ..Self::default()
        }
    }

    /// Input carrying a full control state.
    pub fn input(controls: Controls) -> Self {
        Self {
            up: Some(controls.up),
            down: Some(controls.down),
            left: Some(controls.left),
            right: Some(controls.right),
            split: Some(controls.split),
            ..Self::default()
        }
    }

    /// Empty keepalive message.
    pub fn keepalive() -> Self {
        Self::default()
    }

    /// Control state, if the message carries any control flag.
    ///
    /// Flags missing from a message that has at least one read as `false`.
    pub fn controls(&self) -> Option<Controls> {
        let flags = [self.up, self.down, self.left, self.right, self.split];
        if flags.iter().all(Option::is_none) {
            return None;
        }
        Some(Controls {
            up: self.up.unwrap_or(false),
            down: self.down.unwrap_or(false),
            left: self.left.unwrap_or(false),
            right: self.right.unwrap_or(false),
            split: self.split.unwrap_or(false),
        })
    }

    /// Convert to a validated input for the game layer.
    pub fn to_player_input(&self) -> PlayerInput {
        PlayerInput::new(self.nick.as_deref(), self.controls())
    }

    /// Deserialize from JSON string.
    ///
    /// Rejects anything that is not a JSON object, including arrays that
    /// serde would otherwise accept positionally.
    pub fn from_json(s: &str) -> Result<Self, DecodeError> {
        if s.len() > MAX_MESSAGE_BYTES {
            return Err(DecodeError::TooLarge { len: s.len() });
        }
        let value: serde_json::Value = serde_json::from_str(s)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Decode a raw text frame straight into a validated input.
pub fn decode_input(raw: &str) -> Result<PlayerInput, DecodeError> {
    ClientMessage::from_json(raw).map(|msg| msg.to_player_input())
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Serialize a snapshot once for every recipient.
pub fn encode_snapshot(snapshot: &WorldSnapshot) -> Result<Frame, EncodeError> {
    let text = serde_json::to_string(snapshot)?;
    Ok(Frame::from(text))
}

/// Parse a snapshot frame (client side and tests).
pub fn decode_snapshot(s: &str) -> Result<WorldSnapshot, DecodeError> {
    Ok(serde_json::from_str(s)?)
}

// =============================================================================
// ERRORS
// =============================================================================

/// Malformed inbound payload. The message is discarded; the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not valid JSON, or a field had the wrong type.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,

    /// Frame exceeds [`MAX_MESSAGE_BYTES`].
    #[error("message too large ({len} bytes)")]
    TooLarge {
        /// Size of the rejected frame.
        len: usize,
    },
}

/// Snapshot could not be serialized.
#[derive(Debug, thiserror::Error)]
#[error("snapshot encoding failed: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::{Player, PlayerId};

    #[test]
    fn test_handshake_decodes() {
        let input = decode_input(r#"{"nick":"alice"}"#).unwrap();
        assert_eq!(input.nickname.as_deref(), Some("alice"));
        assert!(input.controls.is_none());
    }

    #[test]
    fn test_input_decodes() {
        let input = decode_input(
            r#"{"up":true,"down":false,"left":false,"right":true,"split":false}"#,
        )
        .unwrap();
        let controls = input.controls.unwrap();
        assert!(controls.up && controls.right);
        assert!(!controls.down && !controls.left && !controls.split);
        assert!(input.nickname.is_none());
    }

    #[test]
    fn test_partial_input_defaults_to_false() {
        let input = decode_input(r#"{"right":true}"#).unwrap();
        assert_eq!(
            input.controls,
            Some(Controls { right: true, ..Controls::default() })
        );
    }

    #[test]
    fn test_keepalive_decodes() {
        let input = decode_input("{}").unwrap();
        assert!(input.is_keepalive());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let input = decode_input(r#"{"left":true,"boost":true}"#).unwrap();
        assert!(input.controls.unwrap().left);
    }

    #[test]
    fn test_nick_with_input() {
        let input = decode_input(r#"{"nick":"bob","split":true}"#).unwrap();
        assert_eq!(input.nickname.as_deref(), Some("bob"));
        assert!(input.controls.unwrap().split);
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(decode_input("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode_input(r#"{"up":"yes"}"#), Err(DecodeError::Json(_))));
        assert!(matches!(decode_input(r#"{"nick":42}"#), Err(DecodeError::Json(_))));
        assert!(matches!(decode_input("[true,false]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_input("null"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_input("\"hi\""), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn test_oversized_payload() {
        let nick = "a".repeat(MAX_MESSAGE_BYTES);
        let raw = format!(r#"{{"nick":"{}"}}"#, nick);
        assert!(matches!(decode_input(&raw), Err(DecodeError::TooLarge { .. })));
    }

    #[test]
    fn test_client_message_shapes() {
        assert_eq!(serde_json::to_string(&ClientMessage::keepalive()).unwrap(), "{}");
        assert_eq!(
            serde_json::to_string(&ClientMessage::handshake("alice")).unwrap(),
            r#"{"nick":"alice"}"#
        );

        let json = serde_json::to_string(&ClientMessage::input(Controls {
            right: true,
            ..Controls::default()
        }))
        .unwrap();
        let parsed = ClientMessage::from_json(&json).unwrap();
        assert_eq!(parsed.right, Some(true));
        assert_eq!(parsed.up, Some(false));
    }

    #[test]
    fn test_snapshot_frame() {
        let player = Player::new(PlayerId::from_bytes([9; 16]), 0xabcdef);
        let snapshot = WorldSnapshot::capture([&player], &[], 42, 1234);

        let frame = encode_snapshot(&snapshot).unwrap();
        assert!(frame.contains("\"players\""));
        assert!(frame.contains("\"zones\":[]"));
        assert!(frame.contains("\"hasCore\":true"));

        let parsed = decode_snapshot(&frame).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
