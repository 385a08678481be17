//! Collaborator interfaces for the vendor camera SDK and the USB bus.
//!
//! The acquisition core never talks to hardware directly. It drives a
//! [`DeviceSdk`] to enumerate and open cameras, a [`CameraDevice`] handle to
//! stream buffers, and a [`BusResetter`] to kick a device that has wedged at
//! the bus level. Real bindings implement these traits; [`MockSdk`] and
//! [`MockBus`] implement them in-process for tests and demos.

mod identity;
mod mock;

pub use identity::DeviceIdentity;
pub use mock::{MockBus, MockConfig, MockSdk};

use crate::capture::PixelFormat;
use std::time::Duration;
use thiserror::Error;

/// Error reported by a vendor SDK call, carrying the SDK's native status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (status {code})")]
pub struct SdkError {
    /// Native status code.
    pub code: i32,
    /// Native error text, possibly empty.
    pub message: String,
}

impl SdkError {
    /// Status code the SDK uses for an expired wait.
    pub const TIMEOUT: i32 = -14;

    /// Creates an error from a native status and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Creates the error returned when a buffer wait expires.
    pub fn timeout() -> Self {
        Self::new(Self::TIMEOUT, "wait timed out")
    }

    /// Returns true if this error is a wait timeout rather than a failure.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        self.code == Self::TIMEOUT
    }
}

/// Errors from the bus-reset facility.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("no usb device with id {0}")]
    NotFound(DeviceIdentity),
    #[error("usb reset failed: {0}")]
    ResetFailed(String),
}

/// How a camera is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// No other process or handle may open the device concurrently.
    Exclusive,
    /// Read-only access alongside an exclusive owner.
    ReadOnly,
}

/// A raw buffer dequeued from the driver.
///
/// The buffer belongs to the driver and must be handed back with
/// [`CameraDevice::enqueue_buffer`] once its contents have been copied out.
#[derive(Clone)]
pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    buffer_id: u64,
}

impl RawFrame {
    /// Wraps a driver buffer.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat, buffer_id: u64) -> Self {
        Self {
            data,
            width,
            height,
            format,
            buffer_id,
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Driver-side buffer slot this frame occupies.
    #[inline]
    pub fn buffer_id(&self) -> u64 {
        self.buffer_id
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("buffer_id", &self.buffer_id)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Process-wide entry point of the vendor SDK.
pub trait DeviceSdk: Send + Sync {
    /// Initializes the SDK's library context. Called once per [`crate::Camera`].
    fn init_library(&self) -> Result<(), SdkError>;

    /// Releases the library context.
    fn close_library(&self);

    /// Re-enumerates attached cameras, waiting at most `timeout`.
    fn refresh_device_list(&self, timeout: Duration) -> Result<u32, SdkError>;

    /// Opens the camera at zero-based `index`.
    fn open(&self, index: u32, access: AccessMode) -> Result<Box<dyn CameraDevice>, SdkError>;
}

/// An open camera handle.
///
/// Exactly one owner holds the handle at a time; it is moved, never shared.
pub trait CameraDevice: Send {
    /// Sets an enumeration feature such as `TriggerMode`.
    fn set_enum(&mut self, name: &str, value: i64) -> Result<(), SdkError>;

    /// Sets a floating-point feature such as `ExposureTime`.
    fn set_float(&mut self, name: &str, value: f64) -> Result<(), SdkError>;

    fn start_stream(&mut self) -> Result<(), SdkError>;

    fn stop_stream(&mut self) -> Result<(), SdkError>;

    /// Waits up to `timeout` for the next filled buffer.
    fn dequeue_buffer(&mut self, timeout: Duration) -> Result<RawFrame, SdkError>;

    /// Returns a buffer to the driver's queue.
    fn enqueue_buffer(&mut self, frame: RawFrame) -> Result<(), SdkError>;

    /// Closes the handle.
    fn close(self: Box<Self>) -> Result<(), SdkError>;
}

/// Bus-level reset facility.
pub trait BusResetter: Send + Sync {
    /// Opens the bus device matching `identity`.
    fn open(&self, identity: DeviceIdentity) -> Result<Box<dyn BusPort>, BusError>;
}

/// An open bus device.
pub trait BusPort: Send {
    /// Issues a port reset, forcing the device to re-enumerate.
    fn reset(&mut self) -> Result<(), BusError>;

    fn close(self: Box<Self>);
}

/// Opens, resets and closes the bus device for `identity`.
pub fn reset_bus(resetter: &dyn BusResetter, identity: DeviceIdentity) -> Result<(), BusError> {
    let mut port = resetter.open(identity)?;
    let result = port.reset();
    port.close();
    result
}
