//! Broadcast Publisher
//!
//! Fans one encoded snapshot out to every recipient's outbound queue.
//! Enqueueing never blocks, so a stalled or dead peer costs the tick loop
//! nothing and never holds up delivery to anyone else. Failed deliveries
//! are counted and logged; unregistering is left to the connection's own
//! close path.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use crate::game::snapshot::WorldSnapshot;
use crate::game::state::PlayerId;
use crate::network::connection::{DeliveryError, PeerLink};
use crate::network::protocol::{encode_snapshot, EncodeError, Frame};

/// Outcome of one publish.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Frames enqueued successfully.
    pub delivered: usize,
    /// Recipients whose queue was full.
    pub queue_full: Vec<PlayerId>,
    /// Recipients whose writer had already gone away.
    pub closed: Vec<PlayerId>,
    /// Recipients already holding a frame from the same or a later tick.
    pub stale: Vec<PlayerId>,
}

impl PublishReport {
    /// Total failed deliveries.
    pub fn dropped(&self) -> usize {
        self.queue_full.len() + self.closed.len() + self.stale.len()
    }
}

/// Running totals across every publish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublisherStats {
    /// Snapshots encoded and fanned out.
    pub frames: u64,
    /// Successful enqueues.
    pub delivered: u64,
    /// Failed enqueues.
    pub dropped: u64,
}

/// Snapshot fan-out with per-peer isolation.
#[derive(Debug, Default)]
pub struct Publisher {
    frames: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Publisher {
    /// Create a publisher with zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `snapshot` once and offer it to every recipient.
    pub fn publish(
        &self,
        snapshot: &WorldSnapshot,
        recipients: &[PeerLink],
    ) -> Result<PublishReport, EncodeError> {
        let frame = encode_snapshot(snapshot)?;
        self.frames.fetch_add(1, Ordering::Relaxed);
        let report = self.deliver(snapshot.tick, &frame, recipients);
        trace!(
            tick = snapshot.tick,
            delivered = report.delivered,
            dropped = report.dropped(),
            "snapshot published"
        );
        Ok(report)
    }

    /// Offer an already-encoded frame for `tick` to every recipient.
    pub fn deliver(&self, tick: u64, frame: &Frame, recipients: &[PeerLink]) -> PublishReport {
        let mut report = PublishReport::default();

        for link in recipients {
            match link.offer(tick, frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::QueueFull) => {
                    debug!(player = %link.id(), dropped = link.dropped(), "peer lagging, frame dropped");
                    report.queue_full.push(link.id());
                }
                Err(DeliveryError::Closed) => {
                    debug!(player = %link.id(), "peer writer closed, frame dropped");
                    report.closed.push(link.id());
                }
                Err(DeliveryError::Stale) => {
                    trace!(player = %link.id(), tick, "peer already has a newer frame");
                    report.stale.push(link.id());
                }
            }
        }

        self.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped() as u64, Ordering::Relaxed);
        report
    }

    /// Current totals.
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            frames: self.frames.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
