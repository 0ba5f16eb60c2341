// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the scanner session
//!
//! Errors are split the way the session reports them: permission failures and
//! configuration failures are surfaced once to the host through the delegate,
//! backend errors travel on the pipeline's out-of-band channel, and everything
//! else (config files, I/O) is returned directly from the call that failed.
//!
//! Dropped detection batches and torch failures are deliberately absent: the
//! former is an expected backpressure outcome and the latter is best-effort.

use crate::backends::BackendError;
use std::fmt;

/// Result type alias using ScannerError
pub type ScannerResult<T> = Result<T, ScannerError>;

/// Top-level error type
#[derive(Debug, Clone)]
pub enum ScannerError {
    /// Camera access was not granted
    Permission(PermissionError),
    /// The capture device could not be configured
    Configuration(ConfigurationError),
    /// Backend failure outside of configuration
    Backend(BackendError),
    /// Configuration file errors
    Config(String),
    /// Thread spawning or filesystem errors
    Io(String),
}

/// Why camera access is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionError {
    /// Access is blocked by policy and the user cannot change it here
    Restricted,
    /// The user declined access
    Denied,
}

impl PermissionError {
    /// Whether the host should offer to open the system privacy settings.
    ///
    /// The session never navigates anywhere itself; this is only the intent.
    pub fn settings_recoverable(&self) -> bool {
        true
    }
}

/// Why the capture device binding could not be built
///
/// Configuration failures are permanent for the binding that hit them.
/// A new controller must be constructed to try again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No capture device exists for video
    NoDeviceAvailable,
    /// The device exists but refused exclusive access
    CannotOpenDevice(String),
}

impl fmt::Display for ScannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScannerError::Permission(e) => write!(f, "Permission error: {}", e),
            ScannerError::Configuration(e) => write!(f, "Configuration error: {}", e),
            ScannerError::Backend(e) => write!(f, "Backend error: {}", e),
            ScannerError::Config(msg) => write!(f, "Config file error: {}", msg),
            ScannerError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for PermissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionError::Restricted => write!(f, "Camera access restricted"),
            PermissionError::Denied => write!(f, "Camera access denied"),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::NoDeviceAvailable => write!(f, "No camera available"),
            ConfigurationError::CannotOpenDevice(detail) => {
                write!(f, "Camera not available: {}", detail)
            }
        }
    }
}

impl std::error::Error for ScannerError {}
impl std::error::Error for PermissionError {}
impl std::error::Error for ConfigurationError {}

impl From<PermissionError> for ScannerError {
    fn from(err: PermissionError) -> Self {
        ScannerError::Permission(err)
    }
}

impl From<ConfigurationError> for ScannerError {
    fn from(err: ConfigurationError) -> Self {
        ScannerError::Configuration(err)
    }
}

impl From<BackendError> for ScannerError {
    fn from(err: BackendError) -> Self {
        ScannerError::Backend(err)
    }
}

impl From<std::io::Error> for ScannerError {
    fn from(err: std::io::Error) -> Self {
        ScannerError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ScannerError {
    fn from(err: serde_json::Error) -> Self {
        ScannerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(PermissionError::Denied.to_string(), "Camera access denied");
        assert_eq!(
            ConfigurationError::CannotOpenDevice("busy".into()).to_string(),
            "Camera not available: busy"
        );
        let err: ScannerError = ConfigurationError::NoDeviceAvailable.into();
        assert_eq!(err.to_string(), "Configuration error: No camera available");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(ScannerError::from(io), ScannerError::Io(_)));
    }
}
