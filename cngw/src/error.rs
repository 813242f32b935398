//! Error types for cngw.

use std::io;
use thiserror::Error;

use crate::image::dist::ParseError;
use crate::protocol::frame::FrameError;

/// Result type for cngw operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cngw operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed or corrupt wire frame.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Malformed or truncated distribution binary.
    #[error("Distribution error: {0}")]
    Dist(#[from] ParseError),

    /// The distribution buffer was handed over before being validated.
    #[error("Distribution buffer is dirty (download incomplete or unvalidated)")]
    DirtyBinary,

    /// The overall send deadline expired before the transfer completed.
    #[error("OTA save timeout: session deadline exceeded")]
    SaveTimeout,

    /// All data was transmitted but the mainboard never confirmed persistence.
    #[error("OTA save error: mainboard did not confirm the firmware was stored")]
    Save,

    /// The receive side reported an unrecoverable link failure.
    #[error("Communication link error reported during OTA")]
    Link,
}
