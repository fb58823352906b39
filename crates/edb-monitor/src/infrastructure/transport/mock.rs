//! Scripted transport for unit and integration tests.
//!
//! The test plays the debugger board: it queues the byte chunks the "device"
//! will deliver, one chunk per `read_available` call, and afterwards inspects
//! what the session wrote.  Chunks may split messages anywhere, which is how
//! tests exercise reassembly across reads.
//!
//! ```text
//! let device = MockDevice::new();
//! device.push_chunk(&[0x90]);            // ACK
//! let mut session = Session::new(MockConnector::new(device.clone()), ..);
//! ...
//! assert_eq!(device.written(), vec![vec![0x02, 0x01]]);  // POWER on
//! ```
//!
//! When the script runs dry the transport returns empty reads.  A test that
//! expects the session to give up can ask the device to trip a
//! [`CancelToken`] at that point, which stands in for the operator pressing
//! Ctrl-C.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::application::session::CancelToken;

use super::{Connector, Transport, TransportError};

#[derive(Debug, Default)]
struct DeviceState {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    connects: u32,
    closes: u32,
    refuse_connect: bool,
    fail_reads: bool,
    cancel_when_idle: Option<CancelToken>,
}

/// Shared handle to the scripted device.  Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one chunk to be returned by a single `read_available` call.
    pub fn push_chunk(&self, bytes: &[u8]) {
        self.lock().incoming.push_back(bytes.to_vec());
    }

    /// Queues `bytes` split into chunks of at most `chunk` bytes.
    pub fn push_split(&self, bytes: &[u8], chunk: usize) {
        let mut state = self.lock();
        for piece in bytes.chunks(chunk.max(1)) {
            state.incoming.push_back(piece.to_vec());
        }
    }

    /// Queues one empty read, which behaves like an exhausted script: it
    /// trips the cancel token if one is set.  Chunks queued after it are
    /// delivered afterwards.
    pub fn push_idle(&self) {
        self.lock().incoming.push_back(Vec::new());
    }

    /// Every `write_all` payload so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Number of chunks not yet delivered.
    pub fn pending_chunks(&self) -> usize {
        self.lock().incoming.len()
    }

    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    pub fn close_count(&self) -> u32 {
        self.lock().closes
    }

    /// Makes the next `connect` calls fail.
    pub fn refuse_connections(&self) {
        self.lock().refuse_connect = true;
    }

    /// Makes reads fail once the script is exhausted, as if the cable was
    /// pulled.
    pub fn fail_reads_when_idle(&self) {
        self.lock().fail_reads = true;
    }

    /// Trips `token` the first time a read finds the script exhausted.
    pub fn cancel_when_idle(&self, token: CancelToken) {
        self.lock().cancel_when_idle = Some(token);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().expect("lock poisoned")
    }
}

/// [`Connector`] that hands out transports bound to one [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    device: MockDevice,
}

impl MockConnector {
    pub fn new(device: MockDevice) -> Self {
        Self { device }
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.device.lock();
        if state.refuse_connect {
            return Err(TransportError::Open {
                port: "mock".to_string(),
                reason: "device refused connection".to_string(),
            });
        }
        state.connects += 1;
        Ok(Box::new(MockTransport {
            device: self.device.clone(),
            open: true,
        }))
    }

    fn describe(&self) -> String {
        "mock device".to_string()
    }
}

/// Transport end of a [`MockDevice`].
#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
    open: bool,
}

impl Transport for MockTransport {
    fn read_available(&mut self) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let mut state = self.device.lock();
        match state.incoming.pop_front() {
            Some(chunk) if !chunk.is_empty() => return Ok(chunk),
            Some(_) => {
                if let Some(token) = &state.cancel_when_idle {
                    token.cancel();
                }
                return Ok(Vec::new());
            }
            None => {}
        }
        if state.fail_reads {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock device unplugged",
            )));
        }
        if let Some(token) = &state.cancel_when_idle {
            token.cancel();
        }
        Ok(Vec::new())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.device.lock().written.push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.device.lock().closes += 1;
        }
    }
}
