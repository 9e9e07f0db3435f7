//! Wires sequences, fixture actors and the DMX writer together.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{error, info, warn};
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::console::Route;
use crate::dmx_output::{DmxTransport, DmxWriter};
use crate::dmx_types::FixtureTemplateLibrary;
use crate::fixture::FixtureActor;
use crate::scheduler::Scheduler;
use crate::sequence::{SequenceCommand, SequenceError};

/// Pending universe updates before actors block on the writer.
const UNIVERSE_QUEUE: usize = 64;
/// Beats buffered per sequence; extra beats are dropped.
const BEAT_QUEUE: usize = 4;

#[derive(Error, Debug)]
pub enum ShowError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Sequence {name} cannot play: {source}")]
    Sequence {
        name: String,
        source: SequenceError,
    },
    #[error("Could not start thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct SequenceHandle {
    name: String,
    commands: Sender<SequenceCommand>,
    beats: Sender<()>,
}

pub struct Show {
    sequences: Vec<SequenceHandle>,
    threads: Vec<JoinHandle<()>>,
}

impl Show {
    /// Spawns the writer, one actor per fixture and one scheduler per sequence.
    pub fn start(cfg: &Config, transport: Box<dyn DmxTransport>) -> Result<Self, ShowError> {
        let library = FixtureTemplateLibrary::new();
        let (universe_tx, universe_rx) = bounded(UNIVERSE_QUEUE);
        let mut threads = vec![DmxWriter::new(transport, universe_rx).spawn()?];
        let mut sequences = Vec::new();

        for (number, seq_cfg) in cfg.sequences.iter().enumerate() {
            let sequence = seq_cfg.sequence(number)?;
            let mut fixtures = Vec::new();
            for (index, definition) in seq_cfg.definitions(&library)?.into_iter().enumerate() {
                let (tx, rx) = bounded(1);
                fixtures.push(tx);
                let actor = FixtureActor::new(index, definition, rx, universe_tx.clone());
                threads.push(actor.spawn()?);
            }

            let (commands, commands_rx) = unbounded();
            let (beats, beats_rx) = bounded(BEAT_QUEUE);
            let scheduler = Scheduler::new(sequence, commands_rx, beats_rx, fixtures).map_err(
                |source| ShowError::Sequence {
                    name: seq_cfg.name.clone(),
                    source,
                },
            )?;
            threads.push(scheduler.spawn()?);
            sequences.push(SequenceHandle {
                name: seq_cfg.name.clone(),
                commands,
                beats,
            });
        }
        info!("Show started with {} sequences", sequences.len());
        Ok(Self { sequences, threads })
    }

    /// Delivers a route. Returns false on quit.
    pub fn dispatch(&self, route: Route) -> bool {
        match route {
            Route::Sequence(index, cmd) => match self.sequences.get(index) {
                Some(seq) => self.send(seq, cmd),
                None => warn!(
                    "No sequence {}; the show has {}",
                    index + 1,
                    self.sequences.len()
                ),
            },
            Route::All(cmd) => {
                for seq in &self.sequences {
                    self.send(seq, cmd.clone());
                }
            }
            Route::Beat => {
                for seq in &self.sequences {
                    let _ = seq.beats.try_send(());
                }
            }
            Route::Quit => return false,
        }
        true
    }

    fn send(&self, seq: &SequenceHandle, cmd: SequenceCommand) {
        if seq.commands.send(cmd).is_err() {
            error!("Sequence {} is not running", seq.name);
        }
    }

    /// Dispatches routes until quit or until every front end hangs up, then
    /// shuts the show down.
    pub fn run(self, routes: Receiver<Route>) {
        for route in routes.iter() {
            if !self.dispatch(route) {
                break;
            }
        }
        self.shutdown();
    }

    /// Stops every sequence and waits for all threads; the universe is left dark.
    pub fn shutdown(self) {
        info!("Shutting down");
        for seq in &self.sequences {
            let _ = seq.commands.send(SequenceCommand::Clear);
            let _ = seq.commands.send(SequenceCommand::Shutdown);
        }
        drop(self.sequences);
        for thread in self.threads {
            if thread.join().is_err() {
                error!("A worker thread panicked");
            }
        }
    }
}
