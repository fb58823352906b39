//! Raw receive log: a transport wrapper that tees every received byte to a file.
//!
//! The file holds the device → host byte stream exactly as read, with no
//! framing of its own.  Feeding it back through `Session::replay` reproduces
//! the same events, which makes field captures debuggable offline.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{Transport, TransportError};

/// Wraps another transport and appends all received bytes to a log file.
pub struct RecordingTransport {
    inner: Box<dyn Transport>,
    log: Option<BufWriter<File>>,
    path: PathBuf,
    recorded: u64,
}

impl RecordingTransport {
    /// Opens (appending) the log at `path` and wraps `inner`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the log file cannot be opened.
    pub fn create(inner: Box<dyn Transport>, path: &Path) -> Result<Self, TransportError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "recording raw receive log");
        Ok(Self {
            inner,
            log: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            recorded: 0,
        })
    }

    /// Bytes written to the log so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }
}

impl Transport for RecordingTransport {
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        let bytes = self.inner.read_available()?;
        if !bytes.is_empty() {
            if let Some(log) = self.log.as_mut() {
                // Log failures stop recording; the link stays up.
                if let Err(e) = log.write_all(&bytes) {
                    warn!(path = %self.path.display(), "raw log write failed, recording stopped: {e}");
                    self.log = None;
                } else {
                    self.recorded += bytes.len() as u64;
                }
            }
        }
        Ok(bytes)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.write_all(bytes)
    }

    fn close(&mut self) {
        if let Some(mut log) = self.log.take() {
            if let Err(e) = log.flush() {
                warn!(path = %self.path.display(), "raw log flush failed: {e}");
            }
        }
        self.inner.close();
    }
}

impl Drop for RecordingTransport {
    fn drop(&mut self) {
        if let Some(log) = self.log.as_mut() {
            let _ = log.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::{MockConnector, MockDevice};
    use crate::infrastructure::transport::Connector;

    fn temp_log(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("edb_rec_{}_{name}.bin", std::process::id()))
    }

    #[test]
    fn test_recording_tees_received_bytes_to_file() {
        // Arrange
        let path = temp_log("tee");
        let _ = std::fs::remove_file(&path);
        let device = MockDevice::new();
        device.push_chunk(&[0x80, 1, 2]);
        device.push_chunk(&[3, 4]);
        let inner = MockConnector::new(device).connect().unwrap();
        let mut transport = RecordingTransport::create(inner, &path).unwrap();

        // Act
        let first = transport.read_available().unwrap();
        let second = transport.read_available().unwrap();
        transport.close();

        // Assert
        assert_eq!(first, vec![0x80, 1, 2]);
        assert_eq!(second, vec![3, 4]);
        assert_eq!(transport.recorded(), 5);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x80, 1, 2, 3, 4]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_writes_are_not_recorded() {
        let path = temp_log("writes");
        let _ = std::fs::remove_file(&path);
        let device = MockDevice::new();
        let inner = MockConnector::new(device.clone()).connect().unwrap();
        let mut transport = RecordingTransport::create(inner, &path).unwrap();

        transport.write_all(&[0x07]).unwrap();
        transport.close();

        assert_eq!(device.written(), vec![vec![0x07]]);
        assert!(std::fs::read(&path).unwrap().is_empty());

        std::fs::remove_file(&path).ok();
    }
}
