//! Single-slot hand-off between the acquisition thread and consumers.
//!
//! The channel holds at most one frame. A publisher blocks while the slot is
//! occupied, so a slow consumer throttles acquisition instead of frames being
//! dropped. Each frame is delivered to exactly one consumer.

use super::CapturedFrame;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Capacity of the hand-off queue.
pub const FRAME_CHANNEL_CAPACITY: usize = 1;

/// Outcome of a blocking publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A consumer will receive the frame.
    Delivered,
    /// Shutdown was requested while waiting for the slot; the frame was dropped.
    Abandoned,
}

/// Consumer side of the hand-off queue. Owns a sender as well, so it can
/// never observe a disconnected channel.
#[derive(Debug, Clone)]
pub struct FrameChannel {
    tx: Sender<CapturedFrame>,
    rx: Receiver<CapturedFrame>,
}

impl FrameChannel {
    pub fn new() -> Self {
        let (tx, rx) = bounded(FRAME_CHANNEL_CAPACITY);
        Self { tx, rx }
    }

    /// Returns a producer handle for an acquisition thread.
    pub fn publisher(&self) -> FramePublisher {
        FramePublisher {
            tx: self.tx.clone(),
        }
    }

    /// Blocks until a frame is available.
    pub fn pop(&self) -> CapturedFrame {
        match self.rx.recv() {
            Ok(frame) => frame,
            // `self.tx` keeps the channel connected for as long as `self` lives.
            Err(_) => unreachable!("frame channel disconnected while borrowed"),
        }
    }

    /// Waits up to `timeout` for a frame.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<CapturedFrame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Takes a frame if one is waiting.
    pub fn try_pop(&self) -> Option<CapturedFrame> {
        self.rx.try_recv().ok()
    }

    /// Number of frames currently queued (0 or 1).
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for FrameChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side of the hand-off queue.
#[derive(Debug, Clone)]
pub struct FramePublisher {
    tx: Sender<CapturedFrame>,
}

impl FramePublisher {
    /// Interval at which a blocked publish re-checks the shutdown flag.
    pub const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

    /// Publishes `frame`, blocking while the slot is full.
    ///
    /// The wait is unbounded except for shutdown: once `shutdown` is set the
    /// frame is dropped within [`Self::SHUTDOWN_POLL`].
    pub fn publish(&self, mut frame: CapturedFrame, shutdown: &AtomicBool) -> PublishOutcome {
        loop {
            if shutdown.load(Ordering::Acquire) {
                return PublishOutcome::Abandoned;
            }
            match self.tx.send_timeout(frame, Self::SHUTDOWN_POLL) {
                Ok(()) => return PublishOutcome::Delivered,
                Err(SendTimeoutError::Timeout(returned)) => frame = returned,
                Err(SendTimeoutError::Disconnected(_)) => return PublishOutcome::Abandoned,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ColorImage;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn frame(sequence: u64) -> CapturedFrame {
        CapturedFrame::new(ColorImage::empty(), Instant::now(), sequence)
    }

    #[test]
    fn test_publish_then_pop() {
        let channel = FrameChannel::new();
        let shutdown = AtomicBool::new(false);
        let outcome = channel.publisher().publish(frame(7), &shutdown);

        assert_eq!(outcome, PublishOutcome::Delivered);
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.pop().sequence(), 7);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_publish_blocks_when_full() {
        let channel = FrameChannel::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let published = Arc::new(AtomicUsize::new(0));

        let producer = {
            let publisher = channel.publisher();
            let shutdown = Arc::clone(&shutdown);
            let published = Arc::clone(&published);
            thread::spawn(move || {
                for seq in 0..5 {
                    publisher.publish(frame(seq), &shutdown);
                    published.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        thread::sleep(Duration::from_millis(150));
        assert_eq!(published.load(Ordering::SeqCst), 1);
        assert_eq!(channel.len(), 1);

        // Draining releases the producer one frame at a time, in order.
        for expected in 0..5 {
            let got = channel.pop_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(got.sequence(), expected);
            assert!(channel.len() <= FRAME_CHANNEL_CAPACITY);
        }
        producer.join().unwrap();
        assert_eq!(published.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_blocked_publish_abandons_on_shutdown() {
        let channel = FrameChannel::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let publisher = channel.publisher();
        assert_eq!(publisher.publish(frame(0), &shutdown), PublishOutcome::Delivered);

        let handle = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || publisher.publish(frame(1), &shutdown))
        };
        thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::Release);

        let started = Instant::now();
        assert_eq!(handle.join().unwrap(), PublishOutcome::Abandoned);
        assert!(started.elapsed() < FramePublisher::SHUTDOWN_POLL * 3);
        assert_eq!(channel.pop().sequence(), 0);
        assert!(channel.try_pop().is_none());
    }

    #[test]
    fn test_each_frame_reaches_one_consumer() {
        let channel = FrameChannel::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let total = 200u64;

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(frame) = channel.pop_timeout(Duration::from_millis(300)) {
                        seen.push(frame.sequence());
                    }
                    seen
                })
            })
            .collect();

        let publisher = channel.publisher();
        for seq in 0..total {
            publisher.publish(frame(seq), &shutdown);
        }

        let mut all: Vec<u64> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..total).collect::<Vec<_>>());
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let channel = FrameChannel::new();
        assert!(channel.pop_timeout(Duration::from_millis(20)).is_none());
    }
}
