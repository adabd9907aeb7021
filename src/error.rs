//! # Error Handling
//!
//! Error types for the daemon, organised by the subsystem that raised them.
//!
//! ## Overview
//!
//! Errors carry enough structure for the supervisor to decide between three
//! outcomes:
//!
//! - **Fatal for the process**: allocation or configuration failures during
//!   startup. The pid file is removed and the process exits with status 1.
//! - **Fatal for one pipeline**: bad geometry, unreadable device. The
//!   pipeline logs, returns the init error and stays down until the
//!   configuration changes. Errors never propagate across pipelines.
//! - **Recoverable**: transient capture failures are not errors at all; the
//!   capture boundary reports them as outcomes (see [`crate::capture`]) and
//!   the pipeline substitutes held or grey frames.

use std::{error::Error as StdError, fmt, io};

/// Base error type for the daemon.
#[derive(Debug)]
pub enum DaemonError {
    /// Configuration parameter rejected.
    Config {
        param: String,
        value: String,
        reason: String,
    },
    /// Capture source could not be opened.
    CaptureInit { device: String, reason: String },
    /// Frame dimensions unusable for detection. Width and height must be
    /// multiples of 8 and at least 64.
    Geometry {
        width: usize,
        height: usize,
        reason: String,
    },
    /// Mask file missing, unreadable or of the wrong dimensions.
    Mask { path: String, reason: String },
    /// Buffer or thread resource could not be allocated.
    Resource { resource: String, reason: String },
    /// Invalid state transition (e.g. resize requested mid-event).
    State {
        current_state: String,
        attempted_operation: String,
        reason: String,
    },
    /// I/O error with the operation that caused it.
    Io {
        operation: String,
        path: Option<String>,
        source: io::Error,
    },
}

impl DaemonError {
    pub fn config(
        param: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            param: param.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn capture_init(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CaptureInit {
            device: device.into(),
            reason: reason.into(),
        }
    }

    pub fn geometry(width: usize, height: usize, reason: impl Into<String>) -> Self {
        Self::Geometry {
            width,
            height,
            reason: reason.into(),
        }
    }

    pub fn mask(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Mask {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn resource(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resource {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn state(
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::State {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            reason: reason.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
        }
    }

    pub fn io_path(
        operation: impl Into<String>,
        path: impl Into<String>,
        source: io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: Some(path.into()),
            source,
        }
    }

    /// Error category as a short static string, used in log prefixes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::CaptureInit { .. } => "capture_init",
            Self::Geometry { .. } => "geometry",
            Self::Mask { .. } => "mask",
            Self::Resource { .. } => "resource",
            Self::State { .. } => "state",
            Self::Io { .. } => "io",
        }
    }

    /// True when the error should bring the whole process down rather than a
    /// single pipeline. Only pre-thread startup failures qualify.
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }

    /// True when the owning pipeline must stay down until its configuration
    /// changes. The supervisor will not restart such a pipeline.
    pub fn is_pipeline_fatal(&self) -> bool {
        matches!(
            self,
            Self::Geometry { .. } | Self::Config { .. } | Self::CaptureInit { .. }
        )
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Config {
                param,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Configuration error in '{}': {} (value: {})",
                    param, reason, value
                )
            }
            DaemonError::CaptureInit { device, reason } => {
                write!(f, "Failed to open capture source {}: {}", device, reason)
            }
            DaemonError::Geometry {
                width,
                height,
                reason,
            } => {
                write!(f, "Unusable image geometry {}x{}: {}", width, height, reason)
            }
            DaemonError::Mask { path, reason } => {
                write!(f, "Mask file '{}': {}", path, reason)
            }
            DaemonError::Resource { resource, reason } => {
                write!(f, "Resource allocation failed for {}: {}", resource, reason)
            }
            DaemonError::State {
                current_state,
                attempted_operation,
                reason,
            } => {
                write!(
                    f,
                    "Invalid state transition from '{}' when attempting '{}': {}",
                    current_state, attempted_operation, reason
                )
            }
            DaemonError::Io {
                operation,
                path,
                source,
            } => {
                if let Some(path) = path {
                    write!(f, "I/O error during {} on '{}': {}", operation, path, source)
                } else {
                    write!(f, "I/O error during {}: {}", operation, source)
                }
            }
        }
    }
}

impl StdError for DaemonError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for DaemonError {
    fn from(error: io::Error) -> Self {
        Self::io("unknown", error)
    }
}

/// Result type alias used throughout the crate.
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let error = DaemonError::config("framerate", "0", "must be greater than 0");
        assert_eq!(error.category(), "config");
        assert!(error.is_pipeline_fatal());
        assert!(!error.is_process_fatal());
    }

    #[test]
    fn test_geometry_classification() {
        let error = DaemonError::geometry(100, 80, "width not a multiple of 8");
        assert!(error.is_pipeline_fatal());
        assert!(error.to_string().contains("100x80"));
    }

    #[test]
    fn test_resource_is_process_fatal() {
        let error = DaemonError::resource("image ring", "out of memory");
        assert!(error.is_process_fatal());
    }
}
