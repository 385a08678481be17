//! Device session: open, configure, stream, and the acquisition loop.

use super::{decode, CaptureConfig, CaptureError, CapturedFrame, ColorImage, FramePublisher, PublishOutcome, StreamFault};
use crate::device::{AccessMode, CameraDevice, DeviceSdk};
use crate::supervisor::SharedState;
use crossbeam_channel::{bounded, Receiver, SendError};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest the acquisition loop waits for a buffer before declaring a stall.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);
/// Longest device enumeration may take.
pub const DEVICE_LIST_TIMEOUT: Duration = Duration::from_millis(1000);
/// Pause between loop iterations; well below any frame period.
pub const LOOP_YIELD: Duration = Duration::from_millis(1);

const EXPOSURE_AUTO: &str = "ExposureAuto";
const EXPOSURE_TIME: &str = "ExposureTime";
const GAIN: &str = "Gain";
const ANALOG_GAIN: &str = "AnalogGain";
const TRIGGER_MODE: &str = "TriggerMode";
const OFF: i64 = 0;

/// The acquisition thread. Yields the device back when it exits normally;
/// after a panic the device has already been released.
type Worker = JoinHandle<Option<Box<dyn CameraDevice>>>;

/// An open, streaming camera and the thread acquiring from it.
///
/// The device handle lives on the acquisition thread while it runs and is
/// handed back when the thread is joined, so only one party ever holds it.
pub struct CaptureSession {
    worker: Option<Worker>,
    shared: Arc<SharedState>,
}

impl CaptureSession {
    /// Opens camera 0 exclusively, applies `config`, starts streaming and
    /// spawns the acquisition loop.
    ///
    /// On error no handle is left open.
    pub fn open(
        sdk: &dyn DeviceSdk,
        config: &CaptureConfig,
        shared: Arc<SharedState>,
        publisher: FramePublisher,
    ) -> Result<Self, CaptureError> {
        let count = sdk
            .refresh_device_list(DEVICE_LIST_TIMEOUT)
            .map_err(CaptureError::sdk("refresh device list"))?;
        if count == 0 {
            return Err(CaptureError::DeviceNotFound);
        }

        let mut device = sdk
            .open(0, AccessMode::Exclusive)
            .map_err(CaptureError::sdk("open device"))?;

        if let Err(e) = configure(device.as_mut(), config) {
            release(device);
            return Err(e);
        }

        // Raised before the spawn so the supervisor cannot see the previous
        // session's fault and tear down this one.
        shared.mark_streaming();

        let worker_shared = Arc::clone(&shared);
        let worker = start_worker(device, move |handoff| {
            thread::Builder::new()
                .name("camera-capture".to_string())
                .spawn(move || {
                    let device = handoff.recv().ok()?;
                    Acquisition::new(worker_shared, publisher, device).run()
                })
        })
        .map_err(|source| {
            shared.mark_unhealthy();
            shared.mark_closed();
            CaptureError::ThreadSpawn {
                name: "capture",
                source,
            }
        })?;

        tracing::info!(
            exposure_ms = config.exposure_ms,
            gain = config.gain,
            "Camera opened"
        );

        Ok(Self {
            worker: Some(worker),
            shared,
        })
    }

    /// True while the acquisition thread has not returned.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Joins the acquisition thread, then stops streaming and closes the
    /// handle.
    ///
    /// The thread only exits after a fault or a shutdown request; callers
    /// must have observed one or the other.
    pub fn close(mut self) {
        self.shutdown_worker();
    }

    fn shutdown_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        match worker.join() {
            Ok(Some(device)) => release(device),
            Ok(None) => {}
            Err(_) => tracing::error!("Capture thread panicked"),
        }
        self.shared.mark_closed();
        tracing::info!("Camera closed");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("running", &self.is_running())
            .field("state", &self.shared.session_state())
            .finish()
    }
}

fn configure(device: &mut dyn CameraDevice, config: &CaptureConfig) -> Result<(), CaptureError> {
    device
        .set_enum(EXPOSURE_AUTO, OFF)
        .map_err(CaptureError::sdk("set ExposureAuto"))?;
    device
        .set_float(EXPOSURE_TIME, config.exposure_us())
        .map_err(CaptureError::sdk("set ExposureTime"))?;

    // Some models only expose analog gain.
    if let Err(e) = device.set_float(GAIN, config.gain) {
        tracing::debug!(error = %e, "Gain rejected, trying AnalogGain");
        if let Err(e) = device.set_float(ANALOG_GAIN, config.gain) {
            tracing::debug!(error = %e, "AnalogGain rejected, keeping device gain");
        }
    }

    device
        .set_enum(TRIGGER_MODE, OFF)
        .map_err(CaptureError::sdk("set TriggerMode"))?;
    device
        .start_stream()
        .map_err(CaptureError::sdk("start stream"))?;
    Ok(())
}

/// Stops streaming and closes the handle, logging failures.
fn release(mut device: Box<dyn CameraDevice>) {
    if let Err(e) = device.stop_stream() {
        tracing::warn!(error = %e, "Stop stream failed");
    }
    if let Err(e) = device.close() {
        tracing::warn!(error = %e, "Close device failed");
    }
}

/// Spawns a worker through `spawn` and only then hands it `device`.
///
/// The device never lives inside a closure that could be dropped unrun: if
/// the thread cannot be created, or exits before taking it, the device is
/// released here.
fn start_worker<S>(device: Box<dyn CameraDevice>, spawn: S) -> io::Result<Worker>
where
    S: FnOnce(Receiver<Box<dyn CameraDevice>>) -> io::Result<Worker>,
{
    let (handoff, receiver) = bounded(1);
    match spawn(receiver) {
        Ok(worker) => {
            if let Err(SendError(device)) = handoff.send(device) {
                release(device);
            }
            Ok(worker)
        }
        Err(e) => {
            release(device);
            Err(e)
        }
    }
}

/// The acquisition loop and the device it is streaming from.
///
/// If the loop panics, `Drop` lowers the health flag and releases the
/// device so the supervisor can recover.
struct Acquisition {
    shared: Arc<SharedState>,
    publisher: FramePublisher,
    device: Option<Box<dyn CameraDevice>>,
}

impl Acquisition {
    fn new(shared: Arc<SharedState>, publisher: FramePublisher, device: Box<dyn CameraDevice>) -> Self {
        Self {
            shared,
            publisher,
            device: Some(device),
        }
    }

    fn run(mut self) -> Option<Box<dyn CameraDevice>> {
        tracing::info!("Capture thread started");

        let result = match self.device.as_deref_mut() {
            Some(device) => stream(&self.shared, &self.publisher, device),
            None => Ok(()),
        };
        if let Err(fault) = result {
            tracing::warn!(%fault, "Acquisition stopped");
            self.shared.mark_faulted();
        }

        tracing::info!("Capture thread stopped");
        self.device.take()
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        tracing::error!("Capture thread panicked, releasing camera");
        self.shared.mark_faulted();
        if let Some(device) = self.device.take() {
            release(device);
        }
    }
}

/// Runs until shutdown (`Ok`) or the first stream fault (`Err`).
fn stream(
    shared: &SharedState,
    publisher: &FramePublisher,
    device: &mut dyn CameraDevice,
) -> Result<(), StreamFault> {
    let stats = shared.stats();

    while !shared.is_shutdown() {
        thread::sleep(LOOP_YIELD);

        let raw = device
            .dequeue_buffer(DEQUEUE_TIMEOUT)
            .map_err(StreamFault::from_dequeue)?;
        let timestamp = Instant::now();

        let image = match decode(raw.data(), raw.width(), raw.height(), raw.format()) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(error = %e, "Publishing empty frame");
                stats.frame_undecodable();
                ColorImage::empty()
            }
        };

        let frame = CapturedFrame::new(image, timestamp, stats.next_sequence());
        let sequence = frame.sequence();
        if publisher.publish(frame, shared.shutdown_flag()) == PublishOutcome::Delivered {
            stats.frame_published();
            tracing::trace!(sequence, "Frame published");
        }

        device.enqueue_buffer(raw).map_err(StreamFault::Enqueue)?;
    }

    Ok(())
}
