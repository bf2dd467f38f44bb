//! Error types for hidwatch.
//!
//! Only two classes of failure cross the registry boundary: the native
//! capability being absent (`Unsupported`) and the monitoring loop dying
//! (`MonitorFailed`). Lost events, interrupted waits and devices that vanish
//! mid-creation are handled where they happen and never show up here.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the hidwatch library.
#[derive(Debug, Error)]
pub enum HotplugError {
    // Capability errors
    #[error("Hotplug monitoring is not supported on this host: {reason}")]
    Unsupported { reason: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Native call errors
    #[cfg(target_os = "linux")]
    #[error("{operation} failed: {source}")]
    Os {
        operation: &'static str,
        #[source]
        source: nix::errno::Errno,
    },

    // Monitor lifecycle errors
    #[error("Device monitor failed: {reason}")]
    MonitorFailed { reason: String },

    #[error("Device registry has not been initialized")]
    NotInitialized,

    #[error("Device monitor is already running")]
    AlreadyRunning,

    #[error("Device events were lost: {reason}")]
    EventsLost { reason: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for hidwatch operations.
pub type Result<T> = std::result::Result<T, HotplugError>;

impl From<std::io::Error> for HotplugError {
    fn from(err: std::io::Error) -> Self {
        HotplugError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl HotplugError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        HotplugError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a native call error.
    #[cfg(target_os = "linux")]
    pub fn os(operation: &'static str, source: nix::errno::Errno) -> Self {
        HotplugError::Os { operation, source }
    }

    /// Create a capability-absent error.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        HotplugError::Unsupported {
            reason: reason.into(),
        }
    }

    /// True when notifications were dropped and the set must be re-read.
    pub fn is_events_lost(&self) -> bool {
        matches!(self, HotplugError::EventsLost { .. })
    }

    /// True when the error means the native capability is missing on this host.
    pub fn is_capability_absent(&self) -> bool {
        matches!(self, HotplugError::Unsupported { .. })
    }

    /// True when the error means monitoring has stopped for good.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HotplugError::MonitorFailed { .. } | HotplugError::Unsupported { .. }
        )
    }
}
