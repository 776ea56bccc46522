//! Transport implementations for the stage link.
//!
//! The [`Transport`] trait is the low-level byte-stream seam under the
//! motion link: open/close lifecycle plus line-oriented reads and writes.
//! Production uses [`SerialTransport`]; tests substitute [`MockTransport`]
//! with scripted firmware replies.

pub mod mock;
pub mod serial;

pub use mock::MockTransport;
pub use serial::SerialTransport;

use crate::error::RigResult;
use async_trait::async_trait;

/// Line-oriented byte-stream transport to the stage firmware.
///
/// Implementations own the underlying handle; the motion link serializes
/// access, so methods may assume a single caller at a time.
#[async_trait]
pub trait Transport: Send {
    /// Open the underlying device. Calling when already open is an error;
    /// the link's `connect` guards with [`Transport::is_open`].
    async fn open(&mut self) -> RigResult<()>;

    /// Release the underlying device.
    async fn close(&mut self) -> RigResult<()>;

    /// Whether the transport currently holds an open device.
    fn is_open(&self) -> bool;

    /// Write one command line; the implementation appends the newline
    /// terminator and flushes.
    async fn write_line(&mut self, line: &str) -> RigResult<()>;

    /// Read one reply line, end-of-line trimmed. A read timeout surfaces as
    /// `RigError::Connection` — a stalled firmware is a hard error.
    async fn read_line(&mut self) -> RigResult<String>;
}
