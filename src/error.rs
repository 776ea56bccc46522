//! Error types for the rig.
//!
//! The primary error type is [`RigError`]. Using the `thiserror` crate, it
//! gives every failure class a distinct variant so callers can react to the
//! class rather than a string:
//!
//! - **`Connection`**: the serial transport could not be opened, or a raw
//!   read/write on it failed. Fatal to the session; there is deliberately no
//!   retry or reconnect-and-resend, because resending a motion command after
//!   an unknown partial failure could double a move.
//! - **`Protocol`**: the stage firmware replied with something the link
//!   cannot parse. Fatal to the current command; the run aborts rather than
//!   guessing at device state.
//! - **`Capture`**: the image sensor failed to produce or save a frame. The
//!   run aborts; partial output directories are left in place so operators
//!   can inspect what succeeded.
//! - **`InvalidGrid`**: degenerate geometry input (rows/cols below 2, or a
//!   solved position outside the machine's travel), rejected before any
//!   device I/O occurs.
//!
//! User-requested cancellation is *not* an error and never appears here.

use thiserror::Error;

/// Convenience alias for results using the rig error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

#[derive(Error, Debug)]
pub enum RigError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Well list error: {0}")]
    WellList(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RigError::Protocol("malformed position report".to_string());
        assert_eq!(err.to_string(), "Protocol error: malformed position report");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such port");
        let err: RigError = io.into();
        assert!(matches!(err, RigError::Io(_)));
    }
}
