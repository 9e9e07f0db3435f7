//! Fixture actor.
//!
//! Each physical fixture is driven by one actor thread. The actor receives
//! frames from its sequence's scheduler, turns its [`FixtureBuffer`] into the
//! fixture's channel values and forwards only changed blocks to the DMX writer.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, never, select, tick};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::compiler::{FixtureBuffer, Position};
use crate::dmx_output::UniverseUpdate;
use crate::dmx_types::{ChannelType, Color, DMXBufferValue, FixtureMode};
use crate::pattern::FixtureKind;

/// Highest strobe rate an actor will toggle at, in flashes per second.
pub const MAX_STROBE_HZ: u8 = 25;

/// One entry of a scanner's color wheel.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, Debug)]
pub struct ColorSlot {
    pub color: Color,
    pub value: u8,
}

/// A raw channel value written by a switch state.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, Debug)]
pub struct SwitchValue {
    pub channel: ChannelType,
    pub value: u8,
}

/// One selectable state of a programmable switch.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct SwitchState {
    pub label: String,
    #[serde(default)]
    pub color: Color,
    #[serde(default)]
    pub values: Vec<SwitchValue>,
}

/// Everything an actor needs to know about the fixture it drives.
#[derive(Clone, Debug)]
pub struct FixtureDefinition {
    pub name: String,
    pub kind: FixtureKind,
    /// First DMX channel, 1-based.
    pub address: usize,
    pub mode: FixtureMode,
    pub colors: Vec<ColorSlot>,
    pub gobos: Vec<u8>,
}

impl FixtureDefinition {
    /// Color-wheel value for `color`: the exact slot if there is one, else
    /// the nearest slot.
    pub fn wheel_value(&self, color: Color) -> u8 {
        if let Some(slot) = self.colors.iter().find(|s| s.color == color) {
            return slot.value;
        }
        self.colors
            .iter()
            .min_by_key(|s| s.color.distance(&color))
            .map(|s| s.value)
            .unwrap_or(0)
    }

    pub fn gobo_value(&self, gobo: u8) -> u8 {
        self.gobos.get(gobo as usize).copied().unwrap_or(0)
    }
}

/// Output flags the scheduler attaches to every position it delivers.
#[derive(Clone, PartialEq, Debug)]
pub struct Frame {
    pub position: Arc<Position>,
    pub master: u8,
    pub blackout: bool,
    pub strobe: bool,
    pub strobe_speed: u8,
    pub label: Arc<str>,
}

#[derive(Clone, PartialEq, Debug, strum::Display)]
pub enum FixtureCommand {
    Frame(Frame),
    Override(SwitchState),
    Shutdown,
}

pub struct FixtureActor {
    index: usize,
    definition: FixtureDefinition,
    commands: Receiver<FixtureCommand>,
    output: Sender<UniverseUpdate>,
    buffer: Option<FixtureBuffer>,
    master: u8,
    blackout: bool,
    strobe: Option<u8>,
    strobe_open: bool,
    strobe_ticker: Receiver<std::time::Instant>,
    switch: Option<SwitchState>,
    sent: Option<Vec<u8>>,
    writer_lost: bool,
}

impl FixtureActor {
    pub fn new(
        index: usize,
        definition: FixtureDefinition,
        commands: Receiver<FixtureCommand>,
        output: Sender<UniverseUpdate>,
    ) -> Self {
        Self {
            index,
            definition,
            commands,
            output,
            buffer: None,
            master: 255,
            blackout: false,
            strobe: None,
            strobe_open: true,
            strobe_ticker: never(),
            switch: None,
            sent: None,
            writer_lost: false,
        }
    }

    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("fixture-{}", self.definition.name))
            .spawn(move || self.run())
    }

    /// Processes commands until shutdown or until the scheduler hangs up.
    pub fn run(mut self) {
        info!(
            "Fixture {} ({}) ready at channel {}",
            self.definition.name, self.definition.kind, self.definition.address
        );
        loop {
            let msg = select! {
                recv(self.commands) -> msg => Some(msg),
                recv(self.strobe_ticker) -> _ => None,
            };
            match msg {
                Some(Ok(FixtureCommand::Shutdown)) | Some(Err(_)) => break,
                Some(Ok(cmd)) => self.handle(cmd),
                None => {
                    self.strobe_open = !self.strobe_open;
                    self.write();
                }
            }
        }
        debug!("Fixture {} stopped", self.definition.name);
    }

    /// Handles every command already queued without blocking. Returns false
    /// once the actor has been told to stop.
    pub fn poll(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(FixtureCommand::Shutdown) => return false,
                Ok(cmd) => self.handle(cmd),
                Err(e) => return !e.is_disconnected(),
            }
        }
    }

    pub fn handle(&mut self, cmd: FixtureCommand) {
        match cmd {
            FixtureCommand::Frame(frame) => {
                self.master = frame.master;
                self.blackout = frame.blackout;
                self.set_strobe(frame.strobe.then_some(frame.strobe_speed));
                if let Some(buffer) = frame.position.get(self.index) {
                    self.buffer = Some(*buffer);
                }
                self.write();
            }
            FixtureCommand::Override(state) => {
                debug!("Fixture {}: switch state {}", self.definition.name, state.label);
                self.switch = Some(state);
                self.write();
            }
            FixtureCommand::Shutdown => {}
        }
    }

    fn set_strobe(&mut self, strobe: Option<u8>) {
        let strobe = strobe.map(|hz| hz.clamp(1, MAX_STROBE_HZ));
        if strobe == self.strobe {
            return;
        }
        self.strobe = strobe;
        self.strobe_open = true;
        self.strobe_ticker = match strobe {
            Some(hz) => tick(Duration::from_millis(500 / hz as u64)),
            None => never(),
        };
    }

    /// Channel values for the current buffer and output flags.
    pub fn render(&self) -> Vec<u8> {
        let mode = &self.definition.mode;
        let mut values = vec![0u8; mode.total_channels()];
        let Some(buffer) = self.buffer else {
            return values;
        };

        let dimmer = mode.has(ChannelType::Intensity);
        let level = scale(self.master, buffer.master);
        // Fixtures without a dimmer channel carry master in the color itself.
        let color = if dimmer {
            buffer.color
        } else {
            buffer.color.scale(level)
        };
        let dark = self.blackout || !self.strobe_open;

        for channel in &mode.channels {
            let value = match channel.channel_type {
                _ if dark && channel.channel_type.carries_light() => 0,
                ChannelType::Intensity => match self.definition.kind {
                    FixtureKind::Rgb => level,
                    FixtureKind::Scanner if buffer.shutter == 0 => 0,
                    FixtureKind::Scanner => level,
                },
                ChannelType::Red => color.r,
                ChannelType::Green => color.g,
                ChannelType::Blue => color.b,
                ChannelType::White => color.w,
                ChannelType::Amber => color.amber,
                ChannelType::UV => color.uv,
                ChannelType::ColorWheel => self.definition.wheel_value(buffer.color),
                ChannelType::GoboWheel => self.definition.gobo_value(buffer.gobo),
                ChannelType::Pan => buffer.pan,
                ChannelType::Tilt => buffer.tilt,
                ChannelType::Shutter => buffer.shutter,
                ChannelType::PanFine
                | ChannelType::TiltFine
                | ChannelType::Strobe
                | ChannelType::Speed
                | ChannelType::Control => 0,
            };
            values[channel.offset as usize] = value;
        }

        if let Some(switch) = &self.switch {
            for v in &switch.values {
                if let Some(offset) = mode.offset_of(v.channel) {
                    values[offset] = v.value;
                }
            }
        }
        values
    }

    /// Sends the rendered block to the writer when it differs from the last
    /// one sent.
    fn write(&mut self) {
        let values = self.render();
        if self.sent.as_ref() == Some(&values) {
            return;
        }
        let update = UniverseUpdate {
            fixture: self.definition.name.clone(),
            values: values
                .iter()
                .enumerate()
                .map(|(offset, v)| DMXBufferValue::new(self.definition.address + offset, *v))
                .collect(),
        };
        match self.output.send(update) {
            Ok(()) => {
                self.sent = Some(values);
                self.writer_lost = false;
            }
            Err(_) if self.writer_lost => {}
            Err(e) => {
                error!("Fixture {}: DMX writer is gone: {e}", self.definition.name);
                self.writer_lost = true;
            }
        }
    }
}

/// `a * b / 255`, rounded.
fn scale(a: u8, b: u8) -> u8 {
    ((a as u16 * b as u16 + 127) / 255) as u8
}
