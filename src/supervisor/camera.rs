//! The camera object handed to consumers.

use super::{CameraStatus, SessionState, SharedState, Supervisor};
use crate::capture::{CaptureConfig, CaptureError, CapturedFrame, FrameChannel};
use crate::device::{BusResetter, DeviceSdk};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A self-healing camera.
///
/// Construction initializes the SDK library and starts the supervisor
/// thread, which opens the device and keeps it streaming. Faults never reach
/// [`Camera::read`]; during recovery it simply blocks longer.
///
/// Dropping the camera stops both threads, closes the device and releases
/// the SDK library, in that order.
pub struct Camera {
    shared: Arc<SharedState>,
    channel: FrameChannel,
    sdk: Arc<dyn DeviceSdk>,
    supervisor: Option<JoinHandle<()>>,
}

impl Camera {
    /// Creates the camera and starts acquisition in the background.
    ///
    /// Succeeds even if no device is attached; the supervisor keeps trying
    /// to open one. `resetter` is used only when `config.bus_identity`
    /// parses.
    pub fn new(
        config: CaptureConfig,
        sdk: Arc<dyn DeviceSdk>,
        resetter: Option<Arc<dyn BusResetter>>,
    ) -> Result<Self, CaptureError> {
        config.validate()?;
        sdk.init_library()
            .map_err(CaptureError::sdk("init library"))?;

        let shared = Arc::new(SharedState::new());
        let channel = FrameChannel::new();
        let supervisor = Supervisor::new(
            config,
            Arc::clone(&sdk),
            resetter,
            Arc::clone(&shared),
            channel.publisher(),
        );

        let handle = thread::Builder::new()
            .name("camera-supervisor".to_string())
            .spawn(move || supervisor.run());
        let handle = match handle {
            Ok(handle) => handle,
            Err(source) => {
                sdk.close_library();
                return Err(CaptureError::ThreadSpawn {
                    name: "supervisor",
                    source,
                });
            }
        };

        tracing::info!("Camera started");
        Ok(Self {
            shared,
            channel,
            sdk,
            supervisor: Some(handle),
        })
    }

    /// Blocks until the next frame is available.
    pub fn read(&self) -> CapturedFrame {
        self.channel.pop()
    }

    /// Waits up to `timeout` for the next frame.
    pub fn read_timeout(&self, timeout: Duration) -> Option<CapturedFrame> {
        self.channel.pop_timeout(timeout)
    }

    /// Returns a frame only if one is already waiting.
    pub fn try_read(&self) -> Option<CapturedFrame> {
        self.channel.try_pop()
    }

    /// True while the acquisition loop is running normally.
    pub fn is_healthy(&self) -> bool {
        self.shared.is_healthy()
    }

    pub fn session_state(&self) -> SessionState {
        self.shared.session_state()
    }

    /// Health, session state and counters at this instant.
    pub fn status(&self) -> CameraStatus {
        self.shared.status()
    }

    /// Stops acquisition and releases the device. Same as dropping.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.shared.request_shutdown();
        if let Some(handle) = self.supervisor.take() {
            if handle.join().is_err() {
                tracing::error!("Supervisor thread panicked");
            }
        }
        self.sdk.close_library();
        tracing::info!("Camera shut down");
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("status", &self.status())
            .finish()
    }
}
