//! Prometheus metrics exporter for camera acquisition.
//!
//! # Metrics Exposed
//!
//! - `camera_acquisition_health_status` - 1 while streaming normally, else 0
//! - `camera_acquisition_session_state` - 0 closed, 1 streaming, 2 faulted
//! - `camera_acquisition_frames_published_total`
//! - `camera_acquisition_stream_faults_total` - dequeue timeouts and driver errors
//! - `camera_acquisition_undecodable_frames_total`
//! - `camera_acquisition_recoveries_total`
//! - `camera_acquisition_reopen_failures_total`
//! - `camera_acquisition_bus_resets_total`
//!
//! # Example
//!
//! ```no_run
//! use camera_acquisition::metrics::{MetricsRegistry, MetricsSnapshot};
//! # fn status() -> camera_acquisition::CameraStatus { unimplemented!() }
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! registry.update(&MetricsSnapshot::from(&status()));
//! println!("{}", registry.encode().unwrap());
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
