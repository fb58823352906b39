//! USB serial transport backed by the `serialport` crate.
//!
//! The debugger board enumerates as a CDC-ACM device and talks at 2 Mbaud.
//! A short read timeout (10 ms by default) keeps the session loop responsive
//! to Ctrl-C without busy-spinning.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info};

use super::{Connector, Transport, TransportError};

/// Size of the scratch buffer for one `read_available` call.
const READ_CHUNK: usize = 4096;

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Port to open; `None` picks the only port present at connect time.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

/// Opens [`SerialTransport`]s with fixed settings.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    settings: SerialSettings,
}

impl SerialConnector {
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }
}

impl Connector for SerialConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let SerialSettings {
            port,
            baud_rate,
            read_timeout,
        } = &self.settings;
        let port = resolve_port(port.as_deref(), &available_ports())?;

        let handle = serialport::new(port.as_str(), *baud_rate)
            .timeout(*read_timeout)
            .open()
            .map_err(|e| TransportError::Open {
                port: port.clone(),
                reason: e.to_string(),
            })?;

        info!(port = %port, baud = baud_rate, "serial port opened");
        Ok(Box::new(SerialTransport {
            port: Some(handle),
            scratch: vec![0; READ_CHUNK],
        }))
    }

    fn describe(&self) -> String {
        format!(
            "{} @ {} baud",
            self.settings.port.as_deref().unwrap_or("auto"),
            self.settings.baud_rate
        )
    }
}

/// An open serial port.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    scratch: Vec<u8>,
}

impl Transport for SerialTransport {
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        match port.read(&mut self.scratch) {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(self.scratch[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
    }
}

/// Lists serial ports the OS knows about, as `name` strings.
///
/// Enumeration failures are reported as an empty list.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            debug!("serial port enumeration failed: {e}");
            Vec::new()
        }
    }
}

/// Picks the port to open: the configured one, or the only port present.
///
/// # Errors
///
/// Returns [`TransportError::NoPort`] when nothing is configured and the
/// choice is not unique.
pub fn resolve_port(configured: Option<&str>, available: &[String]) -> Result<String, TransportError> {
    if let Some(port) = configured {
        return Ok(port.to_string());
    }
    match available {
        [only] => Ok(only.clone()),
        [] => Err(TransportError::NoPort {
            available: "none".to_string(),
        }),
        many => Err(TransportError::NoPort {
            available: many.join(", "),
        }),
    }
}
