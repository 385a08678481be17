//! Camera acquisition: configuration, decoding and the capture session.
//!
//! A [`CaptureSession`] owns an open camera and runs the acquisition loop on
//! its own thread, publishing decoded frames into a [`FrameChannel`]. The
//! session never recovers from faults itself; it drops the health flag and
//! leaves teardown to the supervisor.

mod channel;
mod config;
mod decoder;
mod error;
mod frame;
mod session;

pub use channel::{FrameChannel, FramePublisher, PublishOutcome, FRAME_CHANNEL_CAPACITY};
pub use config::{CaptureConfig, ConfigError, FileConfig, OutputConfig};
pub use decoder::{decode, swap_red_blue, BayerPhase, ColorSite, DecodeError, PixelFormat};
pub use error::{CaptureError, StreamFault};
pub use frame::{CapturedFrame, ColorImage};
pub use session::{CaptureSession, DEQUEUE_TIMEOUT, DEVICE_LIST_TIMEOUT, LOOP_YIELD};
