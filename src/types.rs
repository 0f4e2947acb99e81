//! Shared types for tracking operations

use thiserror::Error;

/// Errors that can occur while driving the station
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Transport layer error (UART, serial, etc.)
    #[error("transport error: {0}")]
    Transport(String),
    /// Invalid parameter passed to a function
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Registration confirm requested before a tag was confirmed
    #[error("no tag is ready for registration")]
    NotReady,
    /// Registration confirm requested without a name
    #[error("bottle name must not be empty")]
    EmptyName,
    /// Registration confirm for a tag other than the confirmed one
    #[error("registration is confirming {expected}, not {got}")]
    EpcMismatch { expected: String, got: String },
    /// Name store could not persist or load a name
    #[error("name store error: {0}")]
    Store(String),
    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
    /// History export failed
    #[error("export error: {0}")]
    Export(String),
}

/// Convert bytes to uppercase hex string
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Format milliseconds as `HH:MM:SS`
pub(crate) fn format_elapsed(elapsed_ms: u64) -> String {
    let seconds = elapsed_ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;
    format!("{:02}:{:02}:{:02}", hours, minutes % 60, seconds % 60)
}
