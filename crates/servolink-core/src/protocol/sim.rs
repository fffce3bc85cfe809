//! Simulated servo controller
//!
//! In-memory [`PortBackend`] that stands in for real hardware. It records
//! every byte that reaches the "wire", counts handle lifecycles and can
//! inject the faults a real USB adapter produces (unplug mid-write, close
//! failing, enumeration failing).

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::backend::{PortBackend, PortDescriptor, SerialSettings, ServoLink};
use super::codec::ServoCommand;

#[derive(Debug, Default)]
struct SimState {
    ports: BTreeSet<String>,
    claimed: BTreeSet<String>,
    wire: Vec<u8>,
    opens: usize,
    closes: usize,
    fail_writes: bool,
    fail_close: bool,
    fail_enumeration: bool,
    write_chunk: Option<usize>,
    write_delay: Option<Duration>,
    last_settings: Option<SerialSettings>,
}

/// Shared-state simulated backend. Clones observe the same device.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBackend {
    /// Create a simulator exposing the given port names
    pub fn with_ports<I, S>(ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sim = Self::default();
        sim.lock().ports = ports.into_iter().map(Into::into).collect();
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make a port visible
    pub fn plug(&self, name: impl Into<String>) {
        self.lock().ports.insert(name.into());
    }

    /// Remove a port. Open links on it start failing writes.
    pub fn unplug(&self, name: &str) {
        self.lock().ports.remove(name);
    }

    /// All bytes written so far, in arrival order
    pub fn wire(&self) -> Vec<u8> {
        self.lock().wire.clone()
    }

    /// Wire contents split into commands. Incomplete or malformed lines are `None`.
    pub fn lines(&self) -> Vec<Option<ServoCommand>> {
        let wire = self.wire();
        wire.split_inclusive(|b| *b == b'\n')
            .map(ServoCommand::parse_line)
            .collect()
    }

    /// Forget recorded traffic
    pub fn clear_wire(&self) {
        self.lock().wire.clear();
    }

    /// Number of successful opens
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Number of closes, including failed ones and implicit drops
    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Settings used by the most recent open
    pub fn last_settings(&self) -> Option<SerialSettings> {
        self.lock().last_settings
    }

    /// Make every subsequent write fail with `BrokenPipe`
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make close report an error (the port is still released)
    pub fn fail_close(&self, fail: bool) {
        self.lock().fail_close = fail;
    }

    /// Make enumeration fail
    pub fn fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    /// Accept at most `chunk` bytes per `write` call, like a busy UART
    pub fn write_chunk(&self, chunk: Option<usize>) {
        self.lock().write_chunk = chunk.map(|c| c.max(1));
    }

    /// Stall every `write` call, like a UART under backpressure
    pub fn write_delay(&self, delay: Option<Duration>) {
        self.lock().write_delay = delay;
    }
}

impl PortBackend for SimulatedBackend {
    fn enumerate(&self) -> Result<Vec<PortDescriptor>, serialport::Error> {
        let state = self.lock();
        if state.fail_enumeration {
            return Err(serialport::Error::new(
                serialport::ErrorKind::Unknown,
                "simulated enumeration failure",
            ));
        }
        Ok(state.ports.iter().map(PortDescriptor::new).collect())
    }

    fn open(&mut self, name: &str, settings: &SerialSettings) -> io::Result<Box<dyn ServoLink>> {
        let mut state = self.lock();
        if !state.ports.contains(name) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such device: {}", name),
            ));
        }
        if state.claimed.contains(name) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("device busy: {}", name),
            ));
        }
        state.claimed.insert(name.to_string());
        state.opens += 1;
        state.last_settings = Some(*settings);
        Ok(Box::new(SimulatedLink {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            released: false,
        }))
    }
}

struct SimulatedLink {
    name: String,
    state: Arc<Mutex<SimState>>,
    released: bool,
}

impl SimulatedLink {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let mut state = self.lock();
        state.claimed.remove(&self.name);
        state.closes += 1;
        if state.fail_close {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "simulated close failure",
            ))
        } else {
            Ok(())
        }
    }
}

impl Write for SimulatedLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let delay = self.lock().write_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        if state.fail_writes || !state.ports.contains(&self.name) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device disconnected",
            ));
        }
        let n = state.write_chunk.map_or(buf.len(), |c| c.min(buf.len()));
        state.wire.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ServoLink for SimulatedLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.release()
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
