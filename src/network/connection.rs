//! Connection Lifecycle
//!
//! Per-connection state machine and outbound queue.
//!
//! ```text
//! Connecting ──open──▶ Open ──close──▶ Closing ──▶ Closed
//!      │                                             ▲
//!      └──────────────────close──────────────────────┘
//! ```
//!
//! Only an `Open` connection has a registered player. Leaving `Open` for any
//! reason unregisters that player exactly once.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::game::state::PlayerId;
use crate::network::protocol::Frame;
use crate::network::registry::Registry;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade accepted, player not yet registered.
    Connecting,
    /// Player registered; inputs are applied.
    Open,
    /// Teardown in progress.
    Closing,
    /// Player unregistered and send path released.
    Closed,
}

/// Why a connection left `Open`.
#[derive(Debug)]
pub enum CloseReason {
    /// Peer sent a close frame or the stream ended.
    PeerClosed,
    /// Read or write failure.
    Transport(ConnectionError),
    /// Server is shutting down.
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::Transport(e) => write!(f, "{}", e),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Read/write failure on a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Reading from the socket failed.
    #[error("read failed: {0}")]
    Read(#[source] tokio_tungstenite::tungstenite::Error),

    /// Writing to the socket failed.
    #[error("write failed: {0}")]
    Write(#[source] tokio_tungstenite::tungstenite::Error),

    /// A single write did not complete in time.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Nothing was received from the peer, not even a pong.
    #[error("peer silent for {0:?}")]
    Idle(Duration),
}

/// Tracks one connection through its lifecycle.
#[derive(Debug)]
pub struct Connection {
    id: PlayerId,
    addr: SocketAddr,
    state: ConnectionState,
    opened_at: Option<Instant>,
}

impl Connection {
    /// New connection in `Connecting`.
    pub fn new(id: PlayerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            state: ConnectionState::Connecting,
            opened_at: None,
        }
    }

    /// Player id owned by this connection.
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether inputs from this connection should be applied.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Mark the connection open once its player is registered.
    pub fn open(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Open;
        self.opened_at = Some(Instant::now());
        info!(player = %self.id, addr = %self.addr, "connection open");
        true
    }

    /// Leave `Open`, unregistering the player.
    ///
    /// Returns `true` only for the call that actually unregistered; every
    /// later call is a no-op.
    pub async fn close(&mut self, registry: &Registry, reason: &CloseReason) -> bool {
        match self.state {
            ConnectionState::Open => {}
            ConnectionState::Connecting => {
                self.state = ConnectionState::Closed;
                return false;
            }
            ConnectionState::Closing | ConnectionState::Closed => return false,
        }

        self.state = ConnectionState::Closing;
        let removed = registry.unregister(&self.id).await;
        self.state = ConnectionState::Closed;

        let lifetime = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
        info!(
            player = %self.id,
            addr = %self.addr,
            reason = %reason,
            lifetime_ms = lifetime.as_millis() as u64,
            "connection closed"
        );
        if !removed {
            debug!(player = %self.id, "player was already unregistered");
        }
        true
    }
}

// =============================================================================
// OUTBOUND LINK
// =============================================================================

/// Per-peer enqueue failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The peer's queue is full; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,
    /// The peer's writer has gone away.
    #[error("outbound queue closed")]
    Closed,
    /// The peer was already offered a frame from the same or a later tick.
    #[error("frame older than one already queued")]
    Stale,
}

/// Sending half of a connection's bounded outbound queue.
///
/// Enqueueing never waits: a slow peer loses frames instead of delaying
/// the caller. Frames reach the queue in strictly increasing tick order.
#[derive(Debug, Clone)]
pub struct PeerLink {
    id: PlayerId,
    sender: mpsc::Sender<Frame>,
    dropped: Arc<AtomicU64>,
    /// Tick of the newest frame queued so far.
    last_tick: Arc<Mutex<Option<u64>>>,
}

impl PeerLink {
    /// Create a link and the receiver its writer task drains.
    pub fn channel(id: PlayerId, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let link = Self {
            id,
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
            last_tick: Arc::new(Mutex::new(None)),
        };
        (link, receiver)
    }

    /// Player this link delivers to.
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Enqueue the frame for `tick` without waiting.
    ///
    /// A frame whose tick is not newer than the last one queued is dropped,
    /// so a welcome snapshot that loses the race with a tick never reaches
    /// the peer out of order.
    pub fn offer(&self, tick: u64, frame: Frame) -> Result<(), DeliveryError> {
        let mut last_tick = self.last_tick.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*last_tick, Some(last) if tick <= last) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(DeliveryError::Stale);
        }

        match self.sender.try_send(frame) {
            Ok(()) => {
                *last_tick = Some(tick);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::Closed)
            }
        }
    }

    /// Frames this link failed to enqueue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
