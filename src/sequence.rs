//! Sequence aggregate and the operator commands that mutate it.
//!
//! A [`Sequence`] is owned by exactly one scheduler; every mutation goes
//! through [`Sequence::apply`], which reports how much of the playout the
//! change invalidates.

use std::time::Duration;

use thiserror::Error;

use crate::compiler::{self, CompileError, CompileParams, FixtureState, MAX_SHIFT, Playout};
use crate::dmx_types::{Color, PALETTE};
use crate::fade::{FadeError, fade_curves};
use crate::fixture::SwitchState;
use crate::pattern::{self, FixtureKind, PatternError, PatternKind, PatternParams, ScannerParams};

pub const MIN_SPEED: u8 = 1;
pub const MAX_SPEED: u8 = 18;
pub const MIN_FADE: usize = 1;
pub const MAX_FADE: usize = 10;
pub const MIN_COORDINATES: usize = 2;
pub const MAX_COORDINATES: usize = 360;

/// Duration of one logical step for speeds 1 to 18.
const STEP_MILLIS: [u64; MAX_SPEED as usize] = [
    3500, 3000, 2500, 2000, 1500, 1000, 750, 500, 400, 300, 250, 200, 150, 125, 100, 75, 50, 25,
];

#[derive(Error, Debug, PartialEq)]
pub enum SequenceError {
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),
    #[error("Fade error: {0}")]
    Fade(#[from] FadeError),
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),
}

/// Operator intents delivered to a sequence's scheduler.
#[derive(Clone, PartialEq, Debug, strum::Display)]
pub enum SequenceCommand {
    Start,
    Stop,
    Clear,
    Blackout(bool),
    UpdateMaster(u8),
    UpdateSpeed(u8),
    UpdatePattern(PatternKind),
    #[strum(to_string = "UpdateFixtureState({index})")]
    UpdateFixtureState {
        index: usize,
        enabled: bool,
        rgb_invert: bool,
        pattern_reverse: bool,
    },
    UpdateShift(usize),
    UpdateSize(u8),
    UpdateFade(usize),
    UpdateColors(Vec<Color>),
    SetStatic(Vec<Color>),
    StartFlood(Color),
    StopFlood,
    EnableMusicTrigger,
    DisableMusicTrigger,
    #[strum(to_string = "OverrideSwitch({switch}, {state})")]
    OverrideSwitch {
        switch: usize,
        state: usize,
    },
    UpdateBounce(bool),
    UpdateInvert(bool),
    UpdateStrobe(bool),
    UpdateStrobeSpeed(u8),
    UpdateScannerSize(u8),
    UpdateCoordinates(usize),
    UpdateScannerChase(bool),
    UpdateGobo(u8),
    UpdateAutoColor(bool),
    UpdateAutoPattern(bool),
    Shutdown,
}

/// Scheduler play states.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, strum::Display)]
pub enum PlayState {
    #[default]
    Idle,
    Running,
    Static,
    Flood,
    Cleared,
}

/// What a parameter change invalidates.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Change {
    /// Nothing changed or the command was ignored.
    None,
    /// Only the tick interval or beat gating changed.
    Timing,
    /// Values applied at the fixture actor changed (master, blackout, strobe).
    Output,
    /// The playout must be recompiled. `reset` rewinds the tick cursor.
    Structure { reset: bool },
    /// Not a parameter change; the scheduler handles it.
    Control,
}

/// A programmable switch bound to one fixture of the sequence.
#[derive(Clone, PartialEq, Debug)]
pub struct Switch {
    pub name: String,
    pub fixture: usize,
    pub states: Vec<SwitchState>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct Sequence {
    pub number: usize,
    pub name: String,
    pub label: String,
    pub kind: FixtureKind,
    pub pattern: PatternKind,
    pub colors: Vec<Color>,
    pub static_colors: Vec<Color>,
    /// Fade the static colors up before holding them.
    pub static_fade: bool,
    pub speed: u8,
    /// Ramp samples for RGB fades, figure points for scanners.
    pub coordinates: usize,
    pub fade: usize,
    pub size: u8,
    pub shift: usize,
    pub bounce: bool,
    pub invert: bool,
    pub auto_color: bool,
    pub auto_pattern: bool,
    pub music_trigger: bool,
    pub blackout: bool,
    pub master: u8,
    pub strobe: bool,
    pub strobe_speed: u8,
    pub optimisation: bool,
    pub scanner_size: u8,
    pub scanner_chase: bool,
    pub gobo: u8,
    pub fixtures: Vec<FixtureState>,
    pub switches: Vec<Switch>,
}

impl Sequence {
    pub fn new(number: usize, name: &str, kind: FixtureKind, fixtures: usize) -> Self {
        let (pattern, coordinates) = match kind {
            FixtureKind::Rgb => (PatternKind::Chase, 10),
            FixtureKind::Scanner => (PatternKind::Circle, 36),
        };
        Self {
            number,
            name: name.to_string(),
            label: name.to_string(),
            kind,
            pattern,
            colors: vec![Color::GREEN],
            static_colors: vec![Color::WHITE],
            static_fade: false,
            speed: 12,
            coordinates,
            fade: 1,
            size: 255,
            shift: 0,
            bounce: false,
            invert: false,
            auto_color: false,
            auto_pattern: false,
            music_trigger: false,
            blackout: false,
            master: 255,
            strobe: false,
            strobe_speed: 10,
            optimisation: kind == FixtureKind::Rgb,
            scanner_size: 128,
            scanner_chase: false,
            gobo: 0,
            fixtures: vec![FixtureState::default(); fixtures],
            switches: Vec::new(),
        }
    }

    pub fn enabled(&self) -> Vec<bool> {
        self.fixtures.iter().map(|f| f.enabled).collect()
    }

    fn scanner_params(&self) -> ScannerParams {
        ScannerParams {
            coordinates: self.coordinates,
            size: self.scanner_size,
            shift: self.shift,
            chase: self.scanner_chase,
            color: self.colors.first().copied().unwrap_or(Color::WHITE),
            gobo: self.gobo,
            ..Default::default()
        }
    }

    /// Runs pattern generation, fade curves and the position compiler.
    pub fn compile(&self) -> Result<Playout, SequenceError> {
        let enabled = self.enabled();
        let pattern = pattern::generate(
            self.pattern,
            &PatternParams {
                enabled: &enabled,
                color: self.colors.first().copied().unwrap_or(Color::WHITE),
                scanner: self.scanner_params(),
            },
        )?
        .recolor(&self.colors);
        pattern.check_arity(self.fixtures.len())?;

        // Scanners never fade, but the compiler still validates an envelope.
        let coordinates = match self.kind {
            FixtureKind::Rgb => self.coordinates,
            FixtureKind::Scanner => MIN_COORDINATES,
        };
        let curves = fade_curves(coordinates, self.fade, self.size)?;

        let playout = compiler::compile(
            &pattern.steps,
            &self.fixtures,
            &curves,
            &CompileParams {
                kind: self.kind,
                bounce: self.bounce,
                scanner_invert: self.invert,
                shift: self.shift,
                optimisation: self.optimisation,
            },
        )?;
        Ok(playout)
    }

    /// Interval between ticks for the current speed.
    pub fn tick_interval(&self, ticks_per_step: usize) -> Duration {
        let step = step_duration(self.speed);
        (step / ticks_per_step.max(1) as u32).max(Duration::from_millis(1))
    }

    /// Rotates the sequence colors to the next palette entry.
    pub fn next_color(&mut self) {
        let current = self.colors.first().copied().unwrap_or(Color::BLACK);
        let next = PALETTE
            .iter()
            .position(|c| *c == current)
            .map(|i| PALETTE[(i + 1) % PALETTE.len()])
            .unwrap_or(PALETTE[0]);
        self.colors = vec![next];
    }

    /// Applies a parameter command, clamping values to their legal range.
    pub fn apply(&mut self, cmd: &SequenceCommand) -> Change {
        match cmd {
            SequenceCommand::Blackout(on) => {
                self.blackout = *on;
                Change::Output
            }
            SequenceCommand::UpdateMaster(master) => {
                self.master = *master;
                Change::Output
            }
            SequenceCommand::UpdateStrobe(on) => {
                self.strobe = *on;
                Change::Output
            }
            SequenceCommand::UpdateStrobeSpeed(speed) => {
                self.strobe_speed = (*speed).max(1);
                Change::Output
            }
            SequenceCommand::UpdateSpeed(speed) => {
                self.speed = (*speed).clamp(MIN_SPEED, MAX_SPEED);
                Change::Timing
            }
            SequenceCommand::EnableMusicTrigger => {
                self.music_trigger = true;
                Change::Timing
            }
            SequenceCommand::DisableMusicTrigger => {
                self.music_trigger = false;
                Change::Timing
            }
            SequenceCommand::UpdateAutoColor(on) => {
                self.auto_color = *on;
                Change::Timing
            }
            SequenceCommand::UpdateAutoPattern(on) => {
                self.auto_pattern = *on;
                Change::Timing
            }
            SequenceCommand::UpdatePattern(pattern) => {
                if pattern.fixture_kind() != self.kind {
                    log::warn!(
                        "Sequence {}: pattern {} cannot drive {} fixtures",
                        self.number,
                        pattern,
                        self.kind
                    );
                    return Change::None;
                }
                self.pattern = *pattern;
                Change::Structure { reset: true }
            }
            SequenceCommand::UpdateFixtureState {
                index,
                enabled,
                rgb_invert,
                pattern_reverse,
            } => {
                let Some(state) = self.fixtures.get_mut(*index) else {
                    log::warn!("Sequence {}: no fixture {}", self.number, index);
                    return Change::None;
                };
                let reset = state.enabled != *enabled;
                *state = FixtureState {
                    enabled: *enabled,
                    rgb_invert: *rgb_invert,
                    pattern_reverse: *pattern_reverse,
                };
                Change::Structure { reset }
            }
            SequenceCommand::UpdateShift(shift) => {
                self.shift = (*shift).min(MAX_SHIFT);
                Change::Structure { reset: false }
            }
            SequenceCommand::UpdateSize(size) => {
                self.size = *size;
                Change::Structure { reset: false }
            }
            SequenceCommand::UpdateFade(fade) => {
                self.fade = (*fade).clamp(MIN_FADE, MAX_FADE);
                Change::Structure { reset: false }
            }
            SequenceCommand::UpdateColors(colors) => {
                if colors.is_empty() {
                    return Change::None;
                }
                self.colors = colors.clone();
                Change::Structure { reset: false }
            }
            SequenceCommand::UpdateBounce(on) => {
                self.bounce = *on;
                Change::Structure { reset: false }
            }
            SequenceCommand::UpdateInvert(on) => {
                self.invert = *on;
                Change::Structure { reset: false }
            }
            SequenceCommand::UpdateScannerSize(size) => {
                self.scanner_size = *size;
                Change::Structure { reset: false }
            }
            SequenceCommand::UpdateCoordinates(coordinates) => {
                self.coordinates = (*coordinates).clamp(MIN_COORDINATES, MAX_COORDINATES);
                Change::Structure { reset: false }
            }
            SequenceCommand::UpdateScannerChase(on) => {
                self.scanner_chase = *on;
                Change::Structure { reset: false }
            }
            SequenceCommand::UpdateGobo(gobo) => {
                self.gobo = *gobo;
                Change::Structure { reset: false }
            }
            SequenceCommand::Start
            | SequenceCommand::Stop
            | SequenceCommand::Clear
            | SequenceCommand::SetStatic(_)
            | SequenceCommand::StartFlood(_)
            | SequenceCommand::StopFlood
            | SequenceCommand::OverrideSwitch { .. }
            | SequenceCommand::Shutdown => Change::Control,
        }
    }
}

pub fn step_duration(speed: u8) -> Duration {
    let idx = speed.clamp(MIN_SPEED, MAX_SPEED) as usize - 1;
    Duration::from_millis(STEP_MILLIS[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_values_are_clamped() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 4);
        seq.apply(&SequenceCommand::UpdateSpeed(0));
        assert_eq!(seq.speed, MIN_SPEED);
        seq.apply(&SequenceCommand::UpdateSpeed(40));
        assert_eq!(seq.speed, MAX_SPEED);
        seq.apply(&SequenceCommand::UpdateShift(9));
        assert_eq!(seq.shift, MAX_SHIFT);
        seq.apply(&SequenceCommand::UpdateFade(0));
        assert_eq!(seq.fade, MIN_FADE);
        seq.apply(&SequenceCommand::UpdateFade(11));
        assert_eq!(seq.fade, MAX_FADE);
    }

    #[test]
    fn changes_are_classified() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 4);
        assert_eq!(seq.apply(&SequenceCommand::Blackout(true)), Change::Output);
        assert_eq!(seq.apply(&SequenceCommand::UpdateSpeed(3)), Change::Timing);
        assert_eq!(
            seq.apply(&SequenceCommand::UpdatePattern(PatternKind::Pairs)),
            Change::Structure { reset: true }
        );
        assert_eq!(
            seq.apply(&SequenceCommand::UpdateShift(1)),
            Change::Structure { reset: false }
        );
        assert_eq!(seq.apply(&SequenceCommand::Start), Change::Control);
    }

    #[test]
    fn fixture_state_resets_only_on_enable_change() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 4);
        let invert = SequenceCommand::UpdateFixtureState {
            index: 1,
            enabled: true,
            rgb_invert: true,
            pattern_reverse: false,
        };
        assert_eq!(seq.apply(&invert), Change::Structure { reset: false });
        let disable = SequenceCommand::UpdateFixtureState {
            index: 1,
            enabled: false,
            rgb_invert: true,
            pattern_reverse: false,
        };
        assert_eq!(seq.apply(&disable), Change::Structure { reset: true });
        assert_eq!(seq.enabled(), vec![true, false, true, true]);

        let missing = SequenceCommand::UpdateFixtureState {
            index: 7,
            enabled: false,
            rgb_invert: false,
            pattern_reverse: false,
        };
        assert_eq!(seq.apply(&missing), Change::None);
    }

    #[test]
    fn scanner_patterns_are_refused_on_rgb_sequences() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 4);
        assert_eq!(
            seq.apply(&SequenceCommand::UpdatePattern(PatternKind::Circle)),
            Change::None
        );
        assert_eq!(seq.pattern, PatternKind::Chase);
    }

    #[test]
    fn tick_interval_divides_the_step() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 4);
        seq.speed = 1;
        assert_eq!(seq.tick_interval(1), Duration::from_millis(3500));
        assert_eq!(seq.tick_interval(10), Duration::from_millis(350));
        seq.speed = MAX_SPEED;
        assert_eq!(seq.tick_interval(100), Duration::from_millis(1));
    }

    #[test]
    fn next_color_walks_the_palette() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 4);
        seq.colors = vec![Color::MAGENTA];
        seq.next_color();
        assert_eq!(seq.colors, vec![Color::RED]);
        seq.colors = vec![Color::from_rgb(1, 2, 3)];
        seq.next_color();
        assert_eq!(seq.colors, vec![Color::RED]);
        seq.next_color();
        assert_eq!(seq.colors, vec![Color::ORANGE]);
    }

    #[test]
    fn sequences_compile() {
        let rgb = Sequence::new(0, "front", FixtureKind::Rgb, 8);
        let playout = rgb.compile().unwrap();
        // 10 ramp samples and a 1 sample hold: 2 * 9 + 1 per step.
        assert_eq!(playout.ticks_per_step, 19);
        assert_eq!(playout.len(), 8 * 19);

        let scanner = Sequence::new(1, "scanners", FixtureKind::Scanner, 4);
        let playout = scanner.compile().unwrap();
        assert_eq!(playout.len(), 36);
        assert_eq!(playout.ticks_per_step, 1);
    }

    #[test]
    fn bad_parameters_surface_as_errors() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 8);
        seq.coordinates = 1;
        assert_eq!(
            seq.compile(),
            Err(SequenceError::Fade(FadeError::TooFewCoordinates(1)))
        );
    }
}
