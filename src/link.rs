//! G-code protocol layer for the stage firmware.
//!
//! [`MotionLink`] owns the transport and runs the half-duplex
//! command/acknowledge exchange: one command at a time, each blocking its
//! caller until the firmware's `ok` terminator has been read back. The lock
//! is held across the whole write-then-drain transaction, so at most one
//! command is ever in flight regardless of how many tasks share the link.
//!
//! Transport failures propagate unretried. Resending a motion command after
//! an unknown partial failure could double a move, so the caller — not this
//! layer — decides whether the session survives.

use crate::adapters::Transport;
use crate::error::{RigError, RigResult};
use log::{debug, info};
use std::time::Duration;
use tokio::sync::Mutex;

/// Absolute stage position report, millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Exclusive handle to the stage firmware.
///
/// Opened once per session, reused across commands, closed on shutdown.
pub struct MotionLink {
    transport: Mutex<Box<dyn Transport>>,
    connect_settle: Duration,
}

impl MotionLink {
    pub fn new(transport: Box<dyn Transport>, connect_settle: Duration) -> Self {
        Self {
            transport: Mutex::new(transport),
            connect_settle,
        }
    }

    /// Open the link. No-op when already open.
    ///
    /// On a fresh open, issues the `M115` capability query and drains the
    /// firmware banner until the acknowledge token, then waits out the
    /// configured settle delay before the first real command.
    pub async fn connect(&self) -> RigResult<()> {
        {
            let mut transport = self.transport.lock().await;
            if transport.is_open() {
                return Ok(());
            }
            info!("Establishing stage connection");
            transport.open().await?;
            exchange(transport.as_mut(), "M115").await?;
        }
        tokio::time::sleep(self.connect_settle).await;
        info!("Stage connected");
        Ok(())
    }

    /// Close the link. No-op when already closed.
    pub async fn close(&self) -> RigResult<()> {
        let mut transport = self.transport.lock().await;
        if transport.is_open() {
            transport.close().await?;
            info!("Stage link closed");
        }
        Ok(())
    }

    /// Send one command and read reply lines until the firmware acknowledges
    /// with a line whose trimmed content is `ok` (case-insensitive). Returns
    /// every line read, terminator included.
    pub async fn send(&self, command: &str) -> RigResult<Vec<String>> {
        let mut transport = self.transport.lock().await;
        exchange(transport.as_mut(), command).await
    }

    /// Query the current stage position (`M114`).
    pub async fn query_position(&self) -> RigResult<Position> {
        let lines = self.send("M114").await?;
        parse_position(&lines)
    }

    /// Home all axes (`G28`). The firmware acknowledges only after the homing
    /// move has physically completed.
    pub async fn home(&self) -> RigResult<()> {
        self.send("G28").await.map(|_| ())
    }

    /// Switch to absolute positioning (`G90`).
    pub async fn set_absolute(&self) -> RigResult<()> {
        self.send("G90").await.map(|_| ())
    }

    /// Switch to relative positioning (`G91`).
    pub async fn set_relative(&self) -> RigResult<()> {
        self.send("G91").await.map(|_| ())
    }

    /// Drain the firmware motion queue (`M400`): acknowledged only once all
    /// queued moves have finished.
    pub async fn wait_for_idle(&self) -> RigResult<()> {
        self.send("M400").await.map(|_| ())
    }

    /// Dump firmware travel limits, feed limits and settings to the log.
    pub async fn log_firmware_stats(&self) -> RigResult<()> {
        for command in ["M211", "M203", "M503"] {
            for line in self.send(command).await? {
                info!("[{command}] {line}");
            }
        }
        Ok(())
    }
}

async fn exchange(transport: &mut dyn Transport, command: &str) -> RigResult<Vec<String>> {
    transport.write_line(command).await?;
    debug!("sent: {command}");

    let mut lines = Vec::new();
    loop {
        let line = transport.read_line().await?;
        debug!("recv: {line}");
        let acknowledged = line.trim().eq_ignore_ascii_case("ok");
        lines.push(line);
        if acknowledged {
            return Ok(lines);
        }
    }
}

/// Parse the first line of an `M114` reply.
///
/// The line must carry three whitespace-separated `AXIS:value` tokens in
/// X, Y, Z order; anything else is a protocol error rather than a guess at
/// coordinates.
fn parse_position(lines: &[String]) -> RigResult<Position> {
    let first = lines
        .first()
        .ok_or_else(|| RigError::Protocol("empty position report".to_string()))?;
    let tokens: Vec<&str> = first.split_whitespace().collect();

    Ok(Position {
        x: axis_value(&tokens, 0, "X")?,
        y: axis_value(&tokens, 1, "Y")?,
        z: axis_value(&tokens, 2, "Z")?,
    })
}

fn axis_value(tokens: &[&str], index: usize, axis: &str) -> RigResult<f64> {
    let token = tokens.get(index).ok_or_else(|| {
        RigError::Protocol(format!("position report missing {axis} axis token"))
    })?;
    let value = token
        .strip_prefix(axis)
        .and_then(|rest| rest.strip_prefix(':'))
        .ok_or_else(|| {
            RigError::Protocol(format!(
                "expected {axis}:<value> token in position report, got '{token}'"
            ))
        })?;
    value.parse::<f64>().map_err(|_| {
        RigError::Protocol(format!("unparseable {axis} coordinate '{value}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    fn link_with_mock() -> (MotionLink, crate::adapters::mock::MockHandle) {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let link = MotionLink::new(Box::new(transport), Duration::ZERO);
        (link, handle)
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (link, handle) = link_with_mock();
        link.connect().await.unwrap();
        link.connect().await.unwrap();
        // Only the first connect issues a capability query.
        assert_eq!(handle.commands(), vec!["M115".to_string()]);
    }

    #[tokio::test]
    async fn test_send_returns_all_lines_including_terminator() {
        let (link, handle) = link_with_mock();
        handle.respond_with("M503", ["echo: G21", "echo: M203 X500", "ok"]);
        link.connect().await.unwrap();

        let lines = link.send("M503").await.unwrap();
        assert_eq!(lines, vec!["echo: G21", "echo: M203 X500", "ok"]);
    }

    #[tokio::test]
    async fn test_mixed_case_acknowledge_token() {
        let (link, handle) = link_with_mock();
        handle.respond_with("G28", ["  Ok  "]);
        link.connect().await.unwrap();
        let lines = link.home().await;
        assert!(lines.is_ok());
    }

    #[tokio::test]
    async fn test_query_position_parses_axis_tokens() {
        let (link, handle) = link_with_mock();
        handle.respond_with("M114", ["X:12.500 Y:3.000 Z:-1.250 E:0.000 Count X:0", "ok"]);
        link.connect().await.unwrap();

        let position = link.query_position().await.unwrap();
        assert_eq!(
            position,
            Position {
                x: 12.5,
                y: 3.0,
                z: -1.25
            }
        );
    }

    #[tokio::test]
    async fn test_missing_axis_is_a_protocol_error() {
        let (link, handle) = link_with_mock();
        handle.respond_with("M114", ["X:12.500 Y:3.000", "ok"]);
        link.connect().await.unwrap();

        let err = link.query_position().await.unwrap_err();
        assert!(matches!(err, RigError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_out_of_order_axes_are_a_protocol_error() {
        let (link, handle) = link_with_mock();
        handle.respond_with("M114", ["Y:3.000 X:12.500 Z:0.000", "ok"]);
        link.connect().await.unwrap();

        let err = link.query_position().await.unwrap_err();
        assert!(matches!(err, RigError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_unretried() {
        let (link, handle) = link_with_mock();
        handle.fail_on("G28");
        link.connect().await.unwrap();

        let err = link.home().await.unwrap_err();
        assert!(matches!(err, RigError::Connection(_)));
        // The failed command never reached the firmware log.
        assert_eq!(handle.commands(), vec!["M115".to_string()]);
    }
}
