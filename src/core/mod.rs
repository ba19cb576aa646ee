//! Core primitives.
//!
//! Math shared by the game and network layers.

pub mod vec2;

// Re-export core types
pub use vec2::Vec2;
