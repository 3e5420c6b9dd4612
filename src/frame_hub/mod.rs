//! FrameHub - Shared Latest-Frame Cell
//!
//! ## Responsibilities
//!
//! - Hold the most recent published frame for one pipeline
//! - Fan it out to any number of live viewers and the scorer sampler
//!
//! The cell is a `watch` channel carrying an `Arc`ed frame: every consumer
//! holds its own receiver, reads are lock-free clones of the `Arc`, and a
//! slow consumer simply skips to the newest value. Nothing downstream can
//! ever backpressure the ingestion loop.

use crate::capture_source::Frame;
use std::sync::Arc;
use tokio::sync::watch;

/// FrameHub instance
pub struct FrameHub {
    tx: watch::Sender<Option<Arc<Frame>>>,
}

impl FrameHub {
    /// Create new FrameHub with an empty cell
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Publish a frame, replacing whatever was latest
    pub fn publish(&self, frame: Arc<Frame>) {
        // send_replace never fails even with zero receivers
        self.tx.send_replace(Some(frame));
    }

    /// Subscribe for change notifications (live viewers, scorer sampler)
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.tx.subscribe()
    }

    /// Latest published frame, if any
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.tx.borrow().clone()
    }

    /// Number of attached consumers
    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FrameSize;
    use bytes::Bytes;
    use chrono::Utc;

    fn frame(tag: u8) -> Arc<Frame> {
        Arc::new(Frame {
            jpeg: Bytes::from(vec![tag]),
            size: FrameSize::new(640, 480),
            captured_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_latest_replaces() {
        let hub = FrameHub::new();
        assert!(hub.latest().is_none());

        hub.publish(frame(1));
        hub.publish(frame(2));
        assert_eq!(hub.latest().unwrap().jpeg[0], 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_to_newest() {
        let hub = FrameHub::new();
        let mut rx = hub.subscribe();

        hub.publish(frame(1));
        hub.publish(frame(2));
        hub.publish(frame(3));

        // one wakeup, newest value only
        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone().unwrap();
        assert_eq!(seen.jpeg[0], 3);
        assert!(!rx.has_changed().unwrap());
    }
}
