//! Error types for gpu-clients

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gpu-clients operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors raised while setting up client monitoring
///
/// Per-process and per-descriptor failures during a scan are not errors:
/// the affected unit is skipped and the scan carries on.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No DRM device was found on this system
    #[error("No DRM device found on this system")]
    NoDeviceFound,

    /// The device filter did not match any device
    #[error("No DRM device matches filter: {filter}")]
    DeviceNotFound {
        /// The filter that matched nothing
        filter: String,
    },

    /// Permission denied when accessing the monitoring surface
    #[error("Permission denied: {message}. Try running as root or as the owner of the monitored processes")]
    PermissionDenied {
        /// Description of the permission error
        message: String,
    },

    /// The engine map is empty, so no engine can ever be tracked
    ///
    /// Only a configured engine map can be empty. With per-client detection
    /// a usage record without engine counters is not a client at all, so a
    /// device without engines simply shows no clients.
    #[error("No engines to track - the engine map is empty")]
    NoEngines,

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error
        message: String,
    },

    /// Error parsing sysfs data
    #[error("Failed to parse sysfs data at {path}: {message}")]
    Sysfs {
        /// The sysfs path that failed to parse
        path: PathBuf,
        /// Description of the parse error
        message: String,
    },

    /// Unexpected IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Platform not supported
    #[error("This platform is not currently supported")]
    PlatformNotSupported,
}

impl Error {
    /// Returns true if this error is due to insufficient permissions
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. })
    }

    /// Returns true if the error indicates a missing device
    pub fn is_device_missing(&self) -> bool {
        matches!(self, Error::NoDeviceFound | Error::DeviceNotFound { .. })
    }

    /// Create a permission denied error from an IO error
    pub(crate) fn permission_denied(source: &io::Error) -> Self {
        Error::PermissionDenied {
            message: source.to_string(),
        }
    }

    /// Create a sysfs parse error
    pub(crate) fn sysfs(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Sysfs {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(Error::NoDeviceFound.is_device_missing());
        assert!(Error::DeviceNotFound {
            filter: "xe".into()
        }
        .is_device_missing());
        assert!(!Error::NoEngines.is_device_missing());

        let io = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(Error::permission_denied(&io).is_permission_error());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::sysfs("/sys/class/drm/card0/dev", "invalid minor");
        assert_eq!(
            err.to_string(),
            "Failed to parse sysfs data at /sys/class/drm/card0/dev: invalid minor"
        );
    }
}
