//! DMX universe writer.
//!
//! Fixture actors send the channel blocks they own; the writer patches them
//! into a single 512-channel universe and pushes the whole universe to the
//! transport whenever it changes.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use open_dmx::DMXSerial;
use parking_lot::Mutex;
use thiserror::Error;

use crate::dmx_types::{DMXBufferValue, DMX_CHANNELS};

/// Universes kept by [`MemoryTransport`].
const MEMORY_HISTORY: usize = 1024;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Could not open DMX port {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("DMX interface disconnected: {0}")]
    Disconnected(String),
}

/// Channel block rendered by one fixture actor.
#[derive(Clone, PartialEq, Debug)]
pub struct UniverseUpdate {
    pub fixture: String,
    pub values: Vec<DMXBufferValue>,
}

/// Something that can put a full universe on the wire.
pub trait DmxTransport: Send {
    fn write(&mut self, universe: &[u8; DMX_CHANNELS]) -> Result<(), TransportError>;
}

/// Open DMX USB interface.
pub struct OpenDmxTransport {
    serial: DMXSerial,
}

impl OpenDmxTransport {
    pub fn open(port: &str) -> Result<Self, TransportError> {
        let serial = DMXSerial::open(port).map_err(|e| TransportError::Open {
            port: port.to_string(),
            reason: e.to_string(),
        })?;
        info!("Opened DMX interface on {port}");
        Ok(Self { serial })
    }
}

impl DmxTransport for OpenDmxTransport {
    fn write(&mut self, universe: &[u8; DMX_CHANNELS]) -> Result<(), TransportError> {
        self.serial.set_channels(*universe);
        self.serial
            .check_agent()
            .map_err(|e| TransportError::Disconnected(e.to_string()))
    }
}

/// Keeps written universes in memory. Used for dry runs and tests.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    universes: Arc<Mutex<VecDeque<[u8; DMX_CHANNELS]>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently written universe.
    pub fn last(&self) -> Option<[u8; DMX_CHANNELS]> {
        self.universes.lock().back().copied()
    }

    pub fn len(&self) -> usize {
        self.universes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.universes.lock().is_empty()
    }

    /// Removes and returns every universe written so far.
    pub fn drain(&self) -> Vec<[u8; DMX_CHANNELS]> {
        self.universes.lock().drain(..).collect()
    }
}

impl DmxTransport for MemoryTransport {
    fn write(&mut self, universe: &[u8; DMX_CHANNELS]) -> Result<(), TransportError> {
        let mut universes = self.universes.lock();
        if universes.len() == MEMORY_HISTORY {
            universes.pop_front();
        }
        universes.push_back(*universe);
        Ok(())
    }
}

/// Owns the universe and the transport.
pub struct DmxWriter {
    transport: Box<dyn DmxTransport>,
    updates: Receiver<UniverseUpdate>,
    universe: [u8; DMX_CHANNELS],
    dirty: bool,
    connected: bool,
}

impl DmxWriter {
    pub fn new(transport: Box<dyn DmxTransport>, updates: Receiver<UniverseUpdate>) -> Self {
        Self {
            transport,
            updates,
            universe: [0u8; DMX_CHANNELS],
            dirty: true,
            connected: true,
        }
    }

    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("dmx-writer".to_string())
            .spawn(move || self.run())
    }

    /// Writes until every actor has hung up, then leaves the universe dark.
    pub fn run(mut self) {
        self.flush();
        while let Ok(update) = self.updates.recv() {
            self.apply(&update);
            self.poll();
        }
        self.universe = [0u8; DMX_CHANNELS];
        self.dirty = true;
        self.flush();
        debug!("DMX writer stopped");
    }

    /// Applies every queued update and writes once.
    pub fn poll(&mut self) {
        while let Ok(update) = self.updates.try_recv() {
            self.apply(&update);
        }
        self.flush();
    }

    /// Patches a fixture block into the universe. Channels are 1-based;
    /// values outside the universe are dropped.
    pub fn apply(&mut self, update: &UniverseUpdate) {
        for v in &update.values {
            match self.universe.get_mut(v.chan.wrapping_sub(1)) {
                Some(chan) if *chan != v.dmx => {
                    *chan = v.dmx;
                    self.dirty = true;
                }
                Some(_) => {}
                None => warn!("{}: channel {} is outside the universe", update.fixture, v.chan),
            }
        }
    }

    /// Sends the universe if it changed. A failed write stays dirty and is
    /// retried with the next update.
    pub fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        match self.transport.write(&self.universe) {
            Ok(()) => {
                if !self.connected {
                    info!("DMX interface reconnected");
                }
                self.connected = true;
                self.dirty = false;
            }
            Err(e) => {
                if self.connected {
                    error!("{e}");
                }
                self.connected = false;
            }
        }
    }

    pub fn universe(&self) -> &[u8; DMX_CHANNELS] {
        &self.universe
    }
}
