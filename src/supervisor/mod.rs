//! Fault detection and recovery.
//!
//! The supervisor polls the health flag every [`HEALTH_TICK`]. When the
//! acquisition loop has dropped it, the supervisor joins that thread, closes
//! the session, resets the camera on the USB bus and opens a new session.
//! A failed reopen is retried on the next tick, forever: the camera is
//! expected to come back eventually, so there is no retry ceiling and no
//! backoff growth.

mod camera;
mod state;

pub use camera::Camera;
pub use state::{CameraStatus, CaptureStats, SessionState, SharedState};

use crate::capture::{CaptureConfig, CaptureSession, FramePublisher};
use crate::device::{self, BusResetter, DeviceIdentity, DeviceSdk};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Interval between health checks, and therefore between reopen attempts.
pub const HEALTH_TICK: Duration = Duration::from_millis(100);

/// Supervisor view of the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    /// The current session is streaming.
    Healthy,
    /// A fault was seen; stays here until a reopened session reports healthy.
    Recovering,
}

/// Owns the current [`CaptureSession`] and replaces it when it faults.
pub(crate) struct Supervisor {
    sdk: Arc<dyn DeviceSdk>,
    resetter: Option<Arc<dyn BusResetter>>,
    identity: Option<DeviceIdentity>,
    config: CaptureConfig,
    shared: Arc<SharedState>,
    publisher: FramePublisher,
    session: Option<CaptureSession>,
    phase: RecoveryPhase,
}

impl Supervisor {
    pub(crate) fn new(
        config: CaptureConfig,
        sdk: Arc<dyn DeviceSdk>,
        resetter: Option<Arc<dyn BusResetter>>,
        shared: Arc<SharedState>,
        publisher: FramePublisher,
    ) -> Self {
        let identity = config.identity();
        Self {
            sdk,
            resetter,
            identity,
            config,
            shared,
            publisher,
            session: None,
            phase: RecoveryPhase::Recovering,
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    /// Opens a session, logging and swallowing any failure.
    pub(crate) fn try_open(&mut self) -> bool {
        match CaptureSession::open(
            self.sdk.as_ref(),
            &self.config,
            Arc::clone(&self.shared),
            self.publisher.clone(),
        ) {
            Ok(session) => {
                self.session = Some(session);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in = ?HEALTH_TICK, "Camera open failed");
                false
            }
        }
    }

    /// Joins the acquisition thread and releases the device. No-op when no
    /// session is held.
    pub(crate) fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    fn reset_bus(&self) {
        let (Some(identity), Some(resetter)) = (self.identity, self.resetter.as_deref()) else {
            return;
        };
        match device::reset_bus(resetter, identity) {
            Ok(()) => {
                self.shared.stats().bus_reset();
                tracing::info!(%identity, "USB reset succeeded");
            }
            Err(e) => tracing::warn!(error = %e, "USB reset failed"),
        }
    }

    /// One health check.
    pub(crate) fn tick(&mut self) {
        if self.shared.is_healthy() {
            if self.phase == RecoveryPhase::Recovering {
                tracing::info!("Camera healthy");
                self.phase = RecoveryPhase::Healthy;
            }
            return;
        }

        if self.phase == RecoveryPhase::Healthy {
            tracing::warn!(state = ?self.shared.session_state(), "Camera unhealthy, recovering");
            self.phase = RecoveryPhase::Recovering;
        }

        self.close_session();
        self.reset_bus();

        if self.try_open() {
            self.shared.stats().recovered();
            tracing::info!("Camera reopened");
        } else {
            self.shared.stats().reopen_failed();
            tracing::debug!("Reopen failed, retrying next tick");
        }
    }

    /// Opens the camera, then checks health every tick until shutdown.
    pub(crate) fn run(mut self) {
        tracing::info!("Supervisor thread started");

        if self.try_open() {
            self.phase = RecoveryPhase::Healthy;
        }

        while !self.shared.is_shutdown() {
            thread::sleep(HEALTH_TICK);
            if self.shared.is_shutdown() {
                break;
            }
            self.tick();
        }

        self.close_session();
        tracing::info!("Supervisor thread stopped");
    }
}
