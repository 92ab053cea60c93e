//! Seam between the protocol core and the OS Bluetooth/HID layer.
//!
//! The core never talks to an operating system: it writes outgoing reports
//! and drains incoming reports through a [`Transport`], and learns about
//! newly paired remotes through a [`Discovery`]. Platform crates implement
//! these traits; the core stays single-threaded and blocking-free.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::result::TransportError;

pub trait Transport {
    /// Sends one outgoing report to the remote.
    ///
    /// # Errors
    ///
    /// This function will return an error if the underlying device is gone
    /// or rejected the write.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Reads one pending input report into `buffer` without blocking.
    ///
    /// Returns `Ok(None)` when no report is waiting.
    ///
    /// # Errors
    ///
    /// This function will return an error if the underlying device is gone.
    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, TransportError>;

    /// Returns the unique identifier of the underlying device.
    fn identifier(&self) -> String;
}

/// Source of newly connected remotes, typically an OS Bluetooth scan.
pub trait Discovery {
    type Transport: Transport;

    /// Returns a transport for every remote currently paired and reachable.
    /// Remotes already handed out may be reported again; the manager matches
    /// them back to known sessions by identifier.
    fn scan(&mut self) -> Vec<Self::Transport>;
}

#[derive(Debug, Default)]
struct ScriptedState {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    closed: bool,
}

/// In-memory transport fed from a script of input reports.
///
/// Clones share the same buffers, so a test can keep one end while the
/// session owns the other: queue incoming reports with
/// [`ScriptedTransport::push_report`] and inspect everything the session
/// wrote. Makes whole protocol exchanges testable without a device.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    identifier: String,
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            state: Arc::default(),
        }
    }

    /// Queues an input report to be returned by a later `read`.
    pub fn push_report(&self, report: &[u8]) {
        self.state().incoming.push_back(report.to_vec());
    }

    /// Reports written by the session so far, oldest first.
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    pub fn clear_written(&self) {
        self.state().written.clear();
    }

    /// Makes every subsequent read and write fail, as if the device was
    /// switched off mid-session.
    pub fn close(&self) {
        self.state().closed = true;
    }

    fn state(&self) -> MutexGuard<'_, ScriptedState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.written.push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, TransportError> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        match state.incoming.pop_front() {
            Some(report) => {
                let length = usize::min(report.len(), buffer.len());
                buffer[..length].copy_from_slice(&report[..length]);
                Ok(Some(length))
            }
            None => Ok(None),
        }
    }

    fn identifier(&self) -> String {
        self.identifier.clone()
    }
}
