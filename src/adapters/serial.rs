//! Serial transport over `tokio-serial`.

use crate::adapters::Transport;
use crate::config::StageSettings;
use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Serial byte-stream transport to the stage firmware.
///
/// Reads are bounded by the configured timeout; there is no retry layer
/// here — a timeout or I/O failure propagates as a connection error and the
/// caller decides whether to abort the session.
pub struct SerialTransport {
    /// Serial device path, e.g. "/dev/ttyUSB0".
    port_name: String,
    baud_rate: u32,
    read_timeout: Duration,
    port: Option<SerialStream>,
    /// Bytes read past the last newline, carried into the next read.
    carry: Vec<u8>,
}

impl SerialTransport {
    pub fn new(port_name: &str, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            read_timeout,
            port: None,
            carry: Vec::new(),
        }
    }

    /// Build a transport from the stage section of the settings tree.
    pub fn from_settings(stage: &StageSettings) -> Self {
        Self::new(&stage.port, stage.baud_rate, stage.read_timeout())
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.carry.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.carry.drain(..=end).collect();
        Some(
            String::from_utf8_lossy(&line)
                .trim_end_matches(['\r', '\n'])
                .to_string(),
        )
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self) -> RigResult<()> {
        let port = tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                RigError::Connection(format!(
                    "failed to open serial port '{}' at {} baud: {}",
                    self.port_name, self.baud_rate, e
                ))
            })?;

        self.port = Some(port);
        self.carry.clear();
        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    async fn close(&mut self) -> RigResult<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn write_line(&mut self, line: &str) -> RigResult<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| RigError::Connection("serial port not open".to_string()))?;

        let framed = format!("{line}\n");
        port.write_all(framed.as_bytes())
            .await
            .map_err(|e| RigError::Connection(format!("serial write failed: {e}")))?;
        port.flush()
            .await
            .map_err(|e| RigError::Connection(format!("serial flush failed: {e}")))?;
        Ok(())
    }

    async fn read_line(&mut self) -> RigResult<String> {
        if let Some(line) = self.take_line() {
            return Ok(line);
        }

        let timeout = self.read_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = [0u8; 256];

        loop {
            let port = self
                .port
                .as_mut()
                .ok_or_else(|| RigError::Connection("serial port not open".to_string()))?;

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(RigError::Connection(format!(
                    "serial read timeout after {timeout:?}"
                )));
            }

            match tokio::time::timeout(remaining, port.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    return Err(RigError::Connection(
                        "unexpected EOF from serial port".to_string(),
                    ));
                }
                Ok(Ok(n)) => {
                    self.carry.extend_from_slice(&buf[..n]);
                    if let Some(line) = self.take_line() {
                        return Ok(line);
                    }
                }
                Ok(Err(e)) => {
                    return Err(RigError::Connection(format!("serial read failed: {e}")));
                }
                Err(_) => {
                    return Err(RigError::Connection(format!(
                        "serial read timeout after {timeout:?}"
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_line_splits_on_newline() {
        let mut transport = SerialTransport::new("/dev/null", 115_200, Duration::from_secs(1));
        transport.carry.extend_from_slice(b"X:1.0 Y:2.0 Z:3.0\r\nok\r\npartial");
        assert_eq!(transport.take_line().as_deref(), Some("X:1.0 Y:2.0 Z:3.0"));
        assert_eq!(transport.take_line().as_deref(), Some("ok"));
        assert_eq!(transport.take_line(), None);
        assert_eq!(transport.carry, b"partial");
    }

    #[tokio::test]
    async fn test_write_before_open_is_a_connection_error() {
        let mut transport = SerialTransport::new("/dev/null", 115_200, Duration::from_secs(1));
        let err = transport.write_line("G28").await.unwrap_err();
        assert!(matches!(err, RigError::Connection(_)));
    }
}
