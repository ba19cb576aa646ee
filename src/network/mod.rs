//! Network Layer
//!
//! WebSocket gateway, player registry and snapshot fan-out.
//! All world mutation goes through [`registry::Registry`]; the rules
//! themselves live in `game/`.

pub mod protocol;
pub mod connection;
pub mod registry;
pub mod broadcast;
pub mod server;

pub use protocol::{ClientMessage, DecodeError, EncodeError, Frame, decode_input, encode_snapshot};
pub use connection::{CloseReason, Connection, ConnectionError, ConnectionState, DeliveryError, PeerLink};
pub use registry::{Registry, RegistryError, TickOutput};
pub use broadcast::{Publisher, PublishReport, PublisherStats};
pub use server::{GameServer, ServerConfig, GameServerError};
