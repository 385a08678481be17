//! Error taxonomy for the acquisition core.

use super::ConfigError;
use crate::device::SdkError;
use thiserror::Error;

/// Why an acquisition loop stopped streaming.
///
/// Stream faults are treated as transient: they drop the health flag and
/// the supervisor recovers the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamFault {
    #[error("timed out waiting for a buffer")]
    DequeueTimeout,
    #[error("dequeue failed: {0}")]
    Dequeue(SdkError),
    #[error("returning buffer to the driver failed: {0}")]
    Enqueue(SdkError),
}

impl StreamFault {
    /// Classifies a failed dequeue.
    pub fn from_dequeue(err: SdkError) -> Self {
        if err.is_timeout() {
            StreamFault::DequeueTimeout
        } else {
            StreamFault::Dequeue(err)
        }
    }
}

/// Errors raised while constructing a camera or opening a session.
///
/// Faults on a running stream are [`StreamFault`]s and undecodable frames
/// are [`super::DecodeError`]s; both are absorbed by recovery and never
/// surface here.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no camera found")]
    DeviceNotFound,
    #[error("{call} failed: {source}")]
    Sdk {
        call: &'static str,
        #[source]
        source: SdkError,
    },
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    /// Wraps a failed SDK call, naming the call for the log.
    pub fn sdk(call: &'static str) -> impl FnOnce(SdkError) -> Self {
        move |source| CaptureError::Sdk { call, source }
    }
}
