//! YAML show file.

use std::fs::File;

use open_dmx::check_valid_channel;
use serde::Deserialize;
use thiserror::Error;

use crate::compiler::MAX_SHIFT;
use crate::dmx_types::{ChannelType, Color, DMX_CHANNELS, FixtureMode, FixtureTemplateLibrary};
use crate::fixture::{ColorSlot, FixtureDefinition, SwitchState};
use crate::pattern::{FixtureKind, PatternKind};
use crate::sequence::{
    MAX_COORDINATES, MAX_FADE, MAX_SPEED, MIN_COORDINATES, MIN_FADE, MIN_SPEED, Sequence, Switch,
};

pub const MAX_SEQUENCES: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read show file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid show file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Show file has no sequences")]
    NoSequences,
    #[error("At most {max} sequences are supported, found {0}", max = MAX_SEQUENCES)]
    TooManySequences(usize),
    #[error("Sequence {0} has no fixtures")]
    EmptySequence(String),
    #[error("Sequence {sequence}: pattern {pattern} cannot drive {kind} fixtures")]
    WrongPattern {
        sequence: String,
        pattern: PatternKind,
        kind: FixtureKind,
    },
    #[error("Fixture {fixture}: unknown template {template}")]
    UnknownTemplate { fixture: String, template: String },
    #[error("Fixture {fixture}: template {template} has no mode {mode}")]
    UnknownMode {
        fixture: String,
        template: String,
        mode: String,
    },
    #[error("Fixture {0} has neither channels nor a template")]
    NoChannels(String),
    #[error("Fixture {fixture}: invalid start address {address}")]
    InvalidAddress { fixture: String, address: usize },
    #[error("Fixture {fixture}: {channels} channels from {address} run past channel {max}", max = DMX_CHANNELS)]
    Footprint {
        fixture: String,
        address: usize,
        channels: usize,
    },
    #[error("Fixture {fixture} needs a {channel} channel")]
    MissingChannel {
        fixture: String,
        channel: ChannelType,
    },
    #[error("Switch {switch} targets missing fixture {fixture}")]
    SwitchFixture { switch: String, fixture: usize },
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub debug: bool,
    /// Serial device of the Open DMX interface; a dry run without one.
    #[serde(default)]
    pub dmx_port: Option<String>,
    /// `a.b.c.d:port` to listen for OSC on.
    #[serde(default)]
    pub osc_listen: Option<String>,
    pub sequences: Vec<SequenceConfig>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config_file = File::open(path)?;
        let cfg: Config = serde_yaml::from_reader(config_file)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sequences.is_empty() {
            return Err(ConfigError::NoSequences);
        }
        if self.sequences.len() > MAX_SEQUENCES {
            return Err(ConfigError::TooManySequences(self.sequences.len()));
        }
        let library = FixtureTemplateLibrary::new();
        for seq in &self.sequences {
            seq.definitions(&library)?;
            seq.sequence(0)?;
        }
        Ok(())
    }
}

fn default_speed() -> u8 {
    12
}

fn default_fade() -> usize {
    1
}

fn default_size() -> u8 {
    255
}

fn default_scanner_size() -> u8 {
    128
}

fn default_strobe_speed() -> u8 {
    10
}

#[derive(Clone, Debug, Deserialize)]
pub struct SequenceConfig {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub kind: FixtureKind,
    #[serde(default)]
    pub pattern: Option<PatternKind>,
    #[serde(default)]
    pub colors: Vec<Color>,
    #[serde(default)]
    pub static_colors: Vec<Color>,
    #[serde(default)]
    pub static_fade: bool,
    #[serde(default = "default_speed")]
    pub speed: u8,
    #[serde(default = "default_fade")]
    pub fade: usize,
    #[serde(default = "default_size")]
    pub size: u8,
    #[serde(default)]
    pub shift: usize,
    #[serde(default)]
    pub bounce: bool,
    #[serde(default)]
    pub invert: bool,
    /// Defaults to 10 ramp samples for RGB, 36 points for scanners.
    #[serde(default)]
    pub coordinates: Option<usize>,
    #[serde(default = "default_scanner_size")]
    pub scanner_size: u8,
    #[serde(default)]
    pub scanner_chase: bool,
    #[serde(default = "default_strobe_speed")]
    pub strobe_speed: u8,
    #[serde(default)]
    pub optimisation: Option<bool>,
    pub fixtures: Vec<FixtureConfig>,
    #[serde(default)]
    pub switches: Vec<SwitchConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FixtureConfig {
    pub name: String,
    /// First DMX channel, 1-based.
    pub address: usize,
    #[serde(default)]
    pub channels: Vec<ChannelType>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    /// Color-wheel table of a scanner.
    #[serde(default)]
    pub colors: Vec<ColorSlot>,
    /// Gobo-wheel values, indexed by gobo number.
    #[serde(default)]
    pub gobos: Vec<u8>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    pub fixture: usize,
    pub states: Vec<SwitchState>,
}

impl SequenceConfig {
    /// Builds the sequence aggregate numbered `number`.
    pub fn sequence(&self, number: usize) -> Result<Sequence, ConfigError> {
        if self.fixtures.is_empty() {
            return Err(ConfigError::EmptySequence(self.name.clone()));
        }
        let mut seq = Sequence::new(number, &self.name, self.kind, self.fixtures.len());
        if let Some(label) = &self.label {
            seq.label = label.clone();
        }
        if let Some(pattern) = self.pattern {
            if pattern.fixture_kind() != self.kind {
                return Err(ConfigError::WrongPattern {
                    sequence: self.name.clone(),
                    pattern,
                    kind: self.kind,
                });
            }
            seq.pattern = pattern;
        }
        if !self.colors.is_empty() {
            seq.colors = self.colors.clone();
        }
        if !self.static_colors.is_empty() {
            seq.static_colors = self.static_colors.clone();
        }
        if let Some(coordinates) = self.coordinates {
            seq.coordinates = coordinates.clamp(MIN_COORDINATES, MAX_COORDINATES);
        }
        if let Some(optimisation) = self.optimisation {
            seq.optimisation = optimisation;
        }
        seq.static_fade = self.static_fade;
        seq.speed = self.speed.clamp(MIN_SPEED, MAX_SPEED);
        seq.fade = self.fade.clamp(MIN_FADE, MAX_FADE);
        seq.size = self.size;
        seq.shift = self.shift.min(MAX_SHIFT);
        seq.bounce = self.bounce;
        seq.invert = self.invert;
        seq.scanner_size = self.scanner_size;
        seq.scanner_chase = self.scanner_chase;
        seq.strobe_speed = self.strobe_speed;

        for switch in &self.switches {
            if switch.fixture >= self.fixtures.len() {
                return Err(ConfigError::SwitchFixture {
                    switch: switch.name.clone(),
                    fixture: switch.fixture,
                });
            }
            seq.switches.push(Switch {
                name: switch.name.clone(),
                fixture: switch.fixture,
                states: switch.states.clone(),
            });
        }
        Ok(seq)
    }

    /// Resolves every fixture's channel layout against the template library.
    pub fn definitions(
        &self,
        library: &FixtureTemplateLibrary,
    ) -> Result<Vec<FixtureDefinition>, ConfigError> {
        self.fixtures
            .iter()
            .map(|f| f.definition(self.kind, library))
            .collect()
    }
}

impl FixtureConfig {
    fn mode(&self, library: &FixtureTemplateLibrary) -> Result<FixtureMode, ConfigError> {
        if !self.channels.is_empty() {
            return Ok(FixtureMode::from_layout("custom", &self.channels));
        }
        let Some(template_name) = &self.template else {
            return Err(ConfigError::NoChannels(self.name.clone()));
        };
        let template =
            library
                .get_template(template_name)
                .ok_or_else(|| ConfigError::UnknownTemplate {
                    fixture: self.name.clone(),
                    template: template_name.clone(),
                })?;
        let mode = match &self.mode {
            Some(mode) => template.get_mode(mode),
            None => template.default_mode(),
        };
        mode.cloned().ok_or_else(|| ConfigError::UnknownMode {
            fixture: self.name.clone(),
            template: template_name.clone(),
            mode: self.mode.clone().unwrap_or_default(),
        })
    }

    pub fn definition(
        &self,
        kind: FixtureKind,
        library: &FixtureTemplateLibrary,
    ) -> Result<FixtureDefinition, ConfigError> {
        let mode = self.mode(library)?;
        if check_valid_channel(self.address).is_err() {
            return Err(ConfigError::InvalidAddress {
                fixture: self.name.clone(),
                address: self.address,
            });
        }
        let channels = mode.total_channels();
        if self.address + channels - 1 > DMX_CHANNELS {
            return Err(ConfigError::Footprint {
                fixture: self.name.clone(),
                address: self.address,
                channels,
            });
        }
        if kind == FixtureKind::Scanner {
            for channel in [ChannelType::Pan, ChannelType::Tilt] {
                if !mode.has(channel) {
                    return Err(ConfigError::MissingChannel {
                        fixture: self.name.clone(),
                        channel,
                    });
                }
            }
        }
        Ok(FixtureDefinition {
            name: self.name.clone(),
            kind,
            address: self.address,
            mode,
            colors: self.colors.clone(),
            gobos: self.gobos.clone(),
        })
    }
}
