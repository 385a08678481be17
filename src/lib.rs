//! Camera Acquisition Library
//!
//! The sensor-acquisition layer of a perception stack. It owns an industrial
//! camera, keeps decoded frames flowing to consumers, and recovers from
//! stream stalls and USB disconnects without operator intervention.
//!
//! # Architecture
//!
//! Two long-lived threads per camera:
//!
//! ```text
//!   supervisor ──owns──▶ CaptureSession ──thread──▶ acquisition loop
//!       │  (health tick)                                   │
//!       │                          dequeue → decode → publish → enqueue
//!       ▼                                                  ▼
//!   close → bus reset → reopen                    FrameChannel (1 slot)
//!                                                          │
//!                                                   Camera::read()
//! ```
//!
//! # Design Principles
//!
//! - **Single owner**: the device handle moves between the acquisition thread
//!   and the supervisor; it is never shared or locked
//! - **Backpressure, not drops**: a full channel blocks the producer
//! - **Faults stay internal**: `read()` never errors, it blocks through recovery
//! - **Retry forever**: reopen is attempted every health tick with no ceiling
//!
//! # Example
//!
//! ```no_run
//! use camera_acquisition::{
//!     capture::CaptureConfig,
//!     device::{DeviceIdentity, MockConfig, MockSdk},
//!     Camera,
//! };
//! use std::sync::Arc;
//!
//! let sdk = MockSdk::new(&MockConfig::default());
//! let bus = sdk.bus(DeviceIdentity::new(0x2bdf, 0x0102));
//! let config = CaptureConfig::new(5.0, 10.0, "2bdf:0102");
//!
//! let camera = Camera::new(config, Arc::new(sdk), Some(Arc::new(bus))).unwrap();
//! for _ in 0..10 {
//!     let frame = camera.read();
//!     println!("frame {} {:?}", frame.sequence(), frame.image());
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod device;
pub mod metrics;
pub mod supervisor;

// Re-export commonly used types at crate root
pub use capture::{CaptureConfig, CaptureError, CapturedFrame, ColorImage, PixelFormat};
pub use device::{BusResetter, CameraDevice, DeviceIdentity, DeviceSdk};
pub use supervisor::{Camera, CameraStatus, SessionState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
