//! State shared between the acquisition thread, the supervisor and readers.
//!
//! Everything here is a plain atomic. The health flag has one writer (the
//! acquisition thread, plus the session right before it spawns that thread)
//! and one reader (the supervisor). The shutdown flag is written once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};

/// Lifecycle of the device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// No handle is held. Initial state, and final state after shutdown.
    Closed = 0,
    /// Opened, configured and streaming.
    Streaming = 1,
    /// The acquisition loop stopped on an error; awaiting the supervisor.
    Faulted = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Streaming,
            2 => SessionState::Faulted,
            _ => SessionState::Closed,
        }
    }
}

/// Counters describing acquisition since the camera was created.
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_published: AtomicU64,
    stream_faults: AtomicU64,
    undecodable_frames: AtomicU64,
    recoveries: AtomicU64,
    reopen_failures: AtomicU64,
    bus_resets: AtomicU64,
    /// Unix millis of the last successful recovery; 0 if none.
    last_recovery_ms: AtomicI64,
    next_sequence: AtomicU64,
}

impl CaptureStats {
    pub(crate) fn frame_published(&self) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_undecodable(&self) {
        self.undecodable_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bus_reset(&self) {
        self.bus_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reopen_failed(&self) {
        self.reopen_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recovered(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        self.last_recovery_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Allocates the next frame sequence number.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

/// Flags and counters shared by one camera's threads.
#[derive(Debug)]
pub struct SharedState {
    health: AtomicBool,
    shutdown: AtomicBool,
    session: AtomicU8,
    stats: CaptureStats,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            health: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            session: AtomicU8::new(SessionState::Closed as u8),
            stats: CaptureStats::default(),
        }
    }
}

impl SharedState {
    /// Closed, unhealthy and not shutting down.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.health.load(Ordering::Acquire)
    }

    /// Marks a freshly opened session as streaming and healthy.
    pub(crate) fn mark_streaming(&self) {
        self.session
            .store(SessionState::Streaming as u8, Ordering::Release);
        self.health.store(true, Ordering::Release);
    }

    /// Drops the health flag. Must happen before the acquisition thread exits.
    pub(crate) fn mark_faulted(&self) {
        self.stats.stream_faults.fetch_add(1, Ordering::Relaxed);
        self.session
            .store(SessionState::Faulted as u8, Ordering::Release);
        self.health.store(false, Ordering::Release);
    }

    pub(crate) fn mark_closed(&self) {
        self.session.store(SessionState::Closed as u8, Ordering::Release);
    }

    /// Undoes `mark_streaming` when the acquisition thread never started.
    pub(crate) fn mark_unhealthy(&self) {
        self.health.store(false, Ordering::Release);
    }

    #[inline]
    pub fn session_state(&self) -> SessionState {
        SessionState::from_u8(self.session.load(Ordering::Acquire))
    }

    /// Requests shutdown. Never cleared.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shutdown flag, for APIs that poll it directly.
    pub(crate) fn shutdown_flag(&self) -> &AtomicBool {
        &self.shutdown
    }

    pub(crate) fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Point-in-time status snapshot.
    pub fn status(&self) -> CameraStatus {
        let s = &self.stats;
        let last_ms = s.last_recovery_ms.load(Ordering::Relaxed);
        CameraStatus {
            session: self.session_state(),
            healthy: self.is_healthy(),
            frames_published: s.frames_published.load(Ordering::Relaxed),
            stream_faults: s.stream_faults.load(Ordering::Relaxed),
            undecodable_frames: s.undecodable_frames.load(Ordering::Relaxed),
            recoveries: s.recoveries.load(Ordering::Relaxed),
            reopen_failures: s.reopen_failures.load(Ordering::Relaxed),
            bus_resets: s.bus_resets.load(Ordering::Relaxed),
            last_recovery: (last_ms != 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_ms))
                .flatten(),
        }
    }
}

/// Snapshot of camera health and counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraStatus {
    /// Current session state.
    pub session: SessionState,
    /// Value of the health flag.
    pub healthy: bool,
    pub frames_published: u64,
    /// Acquisition loops that stopped on a timeout or driver error.
    pub stream_faults: u64,
    /// Frames published empty because their format could not be decoded.
    pub undecodable_frames: u64,
    /// Faults after which a new session came up.
    pub recoveries: u64,
    pub reopen_failures: u64,
    pub bus_resets: u64,
    /// When the last recovery completed.
    pub last_recovery: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed_and_unhealthy() {
        let shared = SharedState::new();
        assert!(!shared.is_healthy());
        assert!(!shared.is_shutdown());
        assert_eq!(shared.session_state(), SessionState::Closed);
        assert_eq!(shared.status().last_recovery, None);
    }

    #[test]
    fn test_fault_transitions() {
        let shared = SharedState::new();
        shared.mark_streaming();
        assert!(shared.is_healthy());
        assert_eq!(shared.session_state(), SessionState::Streaming);

        shared.mark_faulted();
        assert!(!shared.is_healthy());
        assert_eq!(shared.session_state(), SessionState::Faulted);
        assert_eq!(shared.status().stream_faults, 1);

        shared.mark_closed();
        assert_eq!(shared.session_state(), SessionState::Closed);
    }

    #[test]
    fn test_recovery_timestamp() {
        let shared = SharedState::new();
        shared.stats().recovered();
        let status = shared.status();
        assert_eq!(status.recoveries, 1);
        assert!(status.last_recovery.is_some());
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let shared = SharedState::new();
        let a = shared.stats().next_sequence();
        let b = shared.stats().next_sequence();
        assert!(b > a);
    }
}
