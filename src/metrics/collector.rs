//! Metrics collection and registry.

use crate::supervisor::{CameraStatus, SessionState};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of camera state for metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Whether the acquisition loop is currently healthy.
    pub is_healthy: bool,
    /// Session state as 0 (closed), 1 (streaming) or 2 (faulted).
    pub session_state: i64,
    pub frames_published: u64,
    pub stream_faults: u64,
    pub undecodable_frames: u64,
    pub recoveries: u64,
    pub reopen_failures: u64,
    pub bus_resets: u64,
}

impl From<&CameraStatus> for MetricsSnapshot {
    fn from(status: &CameraStatus) -> Self {
        let session_state = match status.session {
            SessionState::Closed => 0,
            SessionState::Streaming => 1,
            SessionState::Faulted => 2,
        };
        Self {
            is_healthy: status.healthy,
            session_state,
            frames_published: status.frames_published,
            stream_faults: status.stream_faults,
            undecodable_frames: status.undecodable_frames,
            recoveries: status.recoveries,
            reopen_failures: status.reopen_failures,
            bus_resets: status.bus_resets,
        }
    }
}

/// Prometheus metrics registry for camera acquisition.
pub struct MetricsRegistry {
    registry: Registry,

    health_status: IntGauge,
    session_state: IntGauge,

    frames_published: IntCounter,
    stream_faults: IntCounter,
    undecodable_frames: IntCounter,

    recoveries: IntCounter,
    reopen_failures: IntCounter,
    bus_resets: IntCounter,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all acquisition metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let health_status = IntGauge::new(
            "camera_acquisition_health_status",
            "Acquisition health (1=streaming normally, 0=faulted or closed)",
        )?;
        let session_state = IntGauge::new(
            "camera_acquisition_session_state",
            "Device session state (0=closed, 1=streaming, 2=faulted)",
        )?;
        let frames_published = IntCounter::new(
            "camera_acquisition_frames_published_total",
            "Frames handed to consumers",
        )?;
        let stream_faults = IntCounter::new(
            "camera_acquisition_stream_faults_total",
            "Acquisition loops stopped by a timeout or driver error",
        )?;
        let undecodable_frames = IntCounter::new(
            "camera_acquisition_undecodable_frames_total",
            "Frames published empty because their pixel format could not be decoded",
        )?;
        let recoveries = IntCounter::new(
            "camera_acquisition_recoveries_total",
            "Sessions reopened by the supervisor",
        )?;
        let reopen_failures = IntCounter::new(
            "camera_acquisition_reopen_failures_total",
            "Failed reopen attempts",
        )?;
        let bus_resets = IntCounter::new(
            "camera_acquisition_bus_resets_total",
            "Successful USB resets",
        )?;

        registry.register(Box::new(health_status.clone()))?;
        registry.register(Box::new(session_state.clone()))?;
        registry.register(Box::new(frames_published.clone()))?;
        registry.register(Box::new(stream_faults.clone()))?;
        registry.register(Box::new(undecodable_frames.clone()))?;
        registry.register(Box::new(recoveries.clone()))?;
        registry.register(Box::new(reopen_failures.clone()))?;
        registry.register(Box::new(bus_resets.clone()))?;

        Ok(Self {
            registry,
            health_status,
            session_state,
            frames_published,
            stream_faults,
            undecodable_frames,
            recoveries,
            reopen_failures,
            bus_resets,
        })
    }

    /// Updates all metrics from a snapshot of camera state.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.health_status.set(if snapshot.is_healthy { 1 } else { 0 });
        self.session_state.set(snapshot.session_state);

        // Counters only move forward; add the difference.
        advance(&self.frames_published, snapshot.frames_published);
        advance(&self.stream_faults, snapshot.stream_faults);
        advance(&self.undecodable_frames, snapshot.undecodable_frames);
        advance(&self.recoveries, snapshot.recoveries);
        advance(&self.reopen_failures, snapshot.reopen_failures);
        advance(&self.bus_resets, snapshot.bus_resets);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        assert!(MetricsRegistry::new().is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        let snapshot = MetricsSnapshot {
            is_healthy: true,
            session_state: 1,
            frames_published: 120,
            stream_faults: 2,
            recoveries: 2,
            bus_resets: 1,
            ..MetricsSnapshot::default()
        };
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("camera_acquisition_health_status 1"));
        assert!(output.contains("camera_acquisition_session_state 1"));
        assert!(output.contains("camera_acquisition_frames_published_total 120"));
        assert!(output.contains("camera_acquisition_recoveries_total 2"));
    }

    #[test]
    fn test_counters_never_decrease() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&MetricsSnapshot {
            frames_published: 10,
            ..MetricsSnapshot::default()
        });
        registry.update(&MetricsSnapshot {
            frames_published: 4,
            ..MetricsSnapshot::default()
        });
        let output = registry.encode().unwrap();
        assert!(output.contains("camera_acquisition_frames_published_total 10"));
    }

    #[test]
    fn test_snapshot_from_status() {
        let status = CameraStatus {
            session: SessionState::Faulted,
            healthy: false,
            frames_published: 7,
            stream_faults: 1,
            undecodable_frames: 0,
            recoveries: 0,
            reopen_failures: 3,
            bus_resets: 3,
            last_recovery: None,
        };
        let snapshot = MetricsSnapshot::from(&status);
        assert_eq!(snapshot.session_state, 2);
        assert!(!snapshot.is_healthy);
        assert_eq!(snapshot.reopen_failures, 3);
    }
}
