//! Pattern library.
//!
//! Deterministic generators that turn a fixture count into a list of logical
//! [`Step`]s. RGB patterns light lamps on or off per step; scanner patterns
//! walk a list of pan/tilt coordinates.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::dmx_types::{Color, PALETTE};

#[derive(Error, Debug, PartialEq)]
pub enum PatternError {
    #[error("Pattern {0} needs at least one scanner coordinate")]
    NoCoordinates(PatternKind),
    #[error("Pattern {0} cannot drive {1} fixtures")]
    WrongKind(PatternKind, FixtureKind),
    #[error("Step {step} has {found} fixtures, expected {expected}")]
    Arity {
        step: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Debug,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FixtureKind {
    #[default]
    Rgb,
    Scanner,
}

/// Every pattern the controller can play.
#[derive(
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Debug,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PatternKind {
    #[default]
    Chase,
    Flash,
    Pairs,
    Inward,
    ColorChase,
    MultiColor,
    RgbChase,
    VuMeter,
    Circle,
    LeftRight,
    UpDown,
    SawTooth,
}

impl PatternKind {
    pub fn number(&self) -> usize {
        PatternKind::iter().position(|p| p == *self).unwrap_or(0)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PatternKind::Chase => "Chase",
            PatternKind::Flash => "Flash",
            PatternKind::Pairs => "Pairs",
            PatternKind::Inward => "Inward",
            PatternKind::ColorChase => "Color Chase",
            PatternKind::MultiColor => "Multi Color",
            PatternKind::RgbChase => "RGB Chase",
            PatternKind::VuMeter => "VU Meter",
            PatternKind::Circle => "Circle",
            PatternKind::LeftRight => "Left Right",
            PatternKind::UpDown => "Up Down",
            PatternKind::SawTooth => "Saw Tooth",
        }
    }

    pub fn fixture_kind(&self) -> FixtureKind {
        match self {
            PatternKind::Circle
            | PatternKind::LeftRight
            | PatternKind::UpDown
            | PatternKind::SawTooth => FixtureKind::Scanner,
            _ => FixtureKind::Rgb,
        }
    }

    /// Patterns whose lit cells take the sequence's colors.
    pub fn is_colorable(&self) -> bool {
        matches!(
            self,
            PatternKind::Chase | PatternKind::Flash | PatternKind::Pairs | PatternKind::Inward
        )
    }

    /// The next pattern of the same fixture kind, wrapping.
    pub fn next(&self) -> PatternKind {
        let same_kind: Vec<PatternKind> = PatternKind::iter()
            .filter(|p| p.fixture_kind() == self.fixture_kind())
            .collect();
        let idx = same_kind.iter().position(|p| p == self).unwrap_or(0);
        same_kind[(idx + 1) % same_kind.len()]
    }
}

/// Logical state of one fixture inside a step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Fixture {
    pub kind: FixtureKind,
    pub enabled: bool,
    pub master: u8,
    pub brightness: u8,
    pub color: Color,
    pub pan: u8,
    pub tilt: u8,
    pub gobo: u8,
    pub shutter: u8,
}

pub const SHUTTER_OPEN: u8 = 255;
pub const SHUTTER_CLOSED: u8 = 0;
pub const CENTER: u8 = 128;

impl Fixture {
    pub fn rgb(color: Color) -> Self {
        Self {
            kind: FixtureKind::Rgb,
            enabled: true,
            master: 255,
            brightness: 255,
            color,
            pan: CENTER,
            tilt: CENTER,
            gobo: 0,
            shutter: SHUTTER_OPEN,
        }
    }

    pub fn off() -> Self {
        Self::rgb(Color::BLACK)
    }

    pub fn scanner(pan: u8, tilt: u8, color: Color, gobo: u8, shutter: u8) -> Self {
        Self {
            kind: FixtureKind::Scanner,
            enabled: true,
            master: 255,
            brightness: 255,
            color,
            pan,
            tilt,
            gobo,
            shutter,
        }
    }

    pub fn is_lit(&self) -> bool {
        match self.kind {
            FixtureKind::Rgb => self.color.has_color(),
            FixtureKind::Scanner => self.shutter != SHUTTER_CLOSED,
        }
    }
}

/// One frame of logical fixture states, one entry per fixture index.
#[derive(Clone, PartialEq, Debug)]
pub struct Step {
    /// Key steps are plain on/off pulses and never fade.
    pub key_step: bool,
    pub fixtures: Vec<Fixture>,
}

impl Step {
    pub fn new(fixtures: Vec<Fixture>) -> Self {
        Self {
            key_step: false,
            fixtures,
        }
    }

    pub fn key(fixtures: Vec<Fixture>) -> Self {
        Self {
            key_step: true,
            fixtures,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Pattern {
    pub name: String,
    pub label: String,
    pub number: usize,
    pub steps: Vec<Step>,
    pub key_sequence: bool,
    colorable: bool,
}

impl Pattern {
    fn from_steps(kind: PatternKind, steps: Vec<Step>) -> Self {
        Self {
            name: kind.to_string(),
            label: kind.label().to_string(),
            number: kind.number(),
            key_sequence: steps.iter().all(|s| s.key_step),
            steps,
            colorable: kind.is_colorable(),
        }
    }

    pub fn fixture_count(&self) -> usize {
        self.steps.first().map(|s| s.fixtures.len()).unwrap_or(0)
    }

    /// Checks that every step carries exactly `expected` fixtures.
    pub fn check_arity(&self, expected: usize) -> Result<(), PatternError> {
        for (step, s) in self.steps.iter().enumerate() {
            if s.fixtures.len() != expected {
                return Err(PatternError::Arity {
                    step,
                    expected,
                    found: s.fixtures.len(),
                });
            }
        }
        Ok(())
    }

    /// Replaces every lit cell of step `i` with `colors[i % colors.len()]`.
    /// Fixed-palette patterns are returned unchanged.
    pub fn recolor(mut self, colors: &[Color]) -> Self {
        if !self.colorable || colors.is_empty() {
            return self;
        }
        for (i, step) in self.steps.iter_mut().enumerate() {
            let color = colors[i % colors.len()];
            for fixture in step.fixtures.iter_mut().filter(|f| f.color.has_color()) {
                fixture.color = color;
            }
        }
        self
    }

    /// Marks fixtures as enabled or disabled without changing the arity.
    pub fn with_enabled(mut self, enabled: &[bool]) -> Self {
        for step in self.steps.iter_mut() {
            for (idx, fixture) in step.fixtures.iter_mut().enumerate() {
                fixture.enabled = enabled.get(idx).copied().unwrap_or(true);
            }
        }
        self
    }
}

/// Parameters of the scanner generators.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ScannerParams {
    /// Number of points on the figure.
    pub coordinates: usize,
    /// Amplitude of the figure: diameter for a circle, span for lines.
    pub size: u8,
    pub center_pan: u8,
    pub center_tilt: u8,
    /// Per-fixture phase in quarters of the figure.
    pub shift: usize,
    /// Open only one scanner's shutter per step.
    pub chase: bool,
    pub color: Color,
    pub gobo: u8,
}

impl Default for ScannerParams {
    fn default() -> Self {
        Self {
            coordinates: 36,
            size: 128,
            center_pan: CENTER,
            center_tilt: CENTER,
            shift: 0,
            chase: false,
            color: Color::WHITE,
            gobo: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PatternParams<'a> {
    /// One flag per fixture; its length is the fixture count.
    pub enabled: &'a [bool],
    /// Lit color of colorable RGB patterns before recoloring.
    pub color: Color,
    pub scanner: ScannerParams,
}

/// Generates `kind` for `params.enabled.len()` fixtures.
///
/// Panics if there are no fixtures.
pub fn generate(kind: PatternKind, params: &PatternParams) -> Result<Pattern, PatternError> {
    let n = params.enabled.len();
    assert!(n > 0, "pattern {kind} generated for zero fixtures");

    let steps = match kind {
        PatternKind::Chase => chase(n, params.color),
        PatternKind::Flash => flash(n, params.color),
        PatternKind::Pairs => pairs(n, params.color),
        PatternKind::Inward => inward(n, params.color),
        PatternKind::ColorChase => color_chase(n),
        PatternKind::MultiColor => multi_color(n),
        PatternKind::RgbChase => rgb_chase(n),
        PatternKind::VuMeter => vu_meter(n),
        PatternKind::Circle
        | PatternKind::LeftRight
        | PatternKind::UpDown
        | PatternKind::SawTooth => {
            if params.scanner.coordinates == 0 {
                return Err(PatternError::NoCoordinates(kind));
            }
            scanner(kind, params.enabled, &params.scanner)
        }
    };

    Ok(Pattern::from_steps(kind, steps).with_enabled(params.enabled))
}

fn lit_if(on: bool, color: Color) -> Fixture {
    if on { Fixture::rgb(color) } else { Fixture::off() }
}

fn chase(n: usize, color: Color) -> Vec<Step> {
    (0..n)
        .map(|i| Step::new((0..n).map(|f| lit_if(f == i, color)).collect()))
        .collect()
}

fn flash(n: usize, color: Color) -> Vec<Step> {
    vec![
        Step::key(vec![Fixture::rgb(color); n]),
        Step::key(vec![Fixture::off(); n]),
    ]
}

fn pairs(n: usize, color: Color) -> Vec<Step> {
    (0..2)
        .map(|i| Step::new((0..n).map(|f| lit_if(f % 2 == i, color)).collect()))
        .collect()
}

/// Lights the outermost pair first and walks towards the middle. An odd
/// middle fixture gets a step of its own.
fn inward(n: usize, color: Color) -> Vec<Step> {
    (0..n.div_ceil(2))
        .map(|i| {
            Step::new(
                (0..n)
                    .map(|f| lit_if(f == i || f == n - 1 - i, color))
                    .collect(),
            )
        })
        .collect()
}

fn color_chase(n: usize) -> Vec<Step> {
    (0..n)
        .map(|i| {
            Step::new(
                (0..n)
                    .map(|f| lit_if(f == i, PALETTE[i % PALETTE.len()]))
                    .collect(),
            )
        })
        .collect()
}

fn multi_color(n: usize) -> Vec<Step> {
    (0..n)
        .map(|i| {
            Step::new(
                (0..n)
                    .map(|f| Fixture::rgb(PALETTE[(i + f) % PALETTE.len()]))
                    .collect(),
            )
        })
        .collect()
}

fn rgb_chase(n: usize) -> Vec<Step> {
    [Color::RED, Color::GREEN, Color::BLUE]
        .into_iter()
        .map(|c| Step::new(vec![Fixture::rgb(c); n]))
        .collect()
}

const VU_BANDS: usize = 8;

fn vu_band_color(band: usize) -> Color {
    match band {
        0..=4 => Color::GREEN,
        5 => Color::YELLOW,
        6 => Color::ORANGE,
        _ => Color::RED,
    }
}

fn vu_meter(n: usize) -> Vec<Step> {
    (0..VU_BANDS)
        .map(|level| {
            Step::new(
                (0..n)
                    .map(|f| {
                        let band = f * VU_BANDS / n;
                        lit_if(band <= level, vu_band_color(band))
                    })
                    .collect(),
            )
        })
        .collect()
}

/// A point on a circle of `radius` around the center, `theta` in degrees.
/// `x` maps to pan and `y` to tilt everywhere in this crate.
pub fn circle_xy(radius: f64, theta: f64, center_x: f64, center_y: f64) -> (f64, f64) {
    let t = theta.to_radians();
    (center_x + radius * t.cos(), center_y - radius * t.sin())
}

fn to_coord(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn linear(k: usize, count: usize, size: u8) -> f64 {
    if count < 2 {
        return 0.0;
    }
    k as f64 * size as f64 / (count - 1) as f64
}

const SAW_TEETH: usize = 4;

/// The figure's points, one (pan, tilt) pair per coordinate.
fn figure(kind: PatternKind, p: &ScannerParams) -> Vec<(u8, u8)> {
    let k_count = p.coordinates;
    let (cx, cy) = (p.center_pan as f64, p.center_tilt as f64);
    (0..k_count)
        .map(|k| match kind {
            PatternKind::Circle => {
                // 270 degrees puts the first point at the top of the circle.
                let theta = 270.0 + k as f64 * 360.0 / k_count as f64;
                let (x, y) = circle_xy(p.size as f64 / 2.0, theta, cx, cy);
                (to_coord(x), to_coord(y))
            }
            PatternKind::LeftRight => (to_coord(linear(k, k_count, p.size)), p.center_tilt),
            PatternKind::UpDown => (p.center_pan, to_coord(linear(k, k_count, p.size))),
            _ => {
                let phase = (k * SAW_TEETH % k_count) as f64 / k_count as f64;
                let tri = if phase < 0.5 { 2.0 * phase } else { 2.0 - 2.0 * phase };
                let tilt = cy - p.size as f64 / 2.0 + tri * p.size as f64;
                (to_coord(linear(k, k_count, p.size)), to_coord(tilt))
            }
        })
        .collect()
}

/// Offset into the figure for fixture `index`: `index * shift` quarters,
/// reduced modulo the figure length.
pub fn scanner_offset(index: usize, shift: usize, coordinates: usize) -> usize {
    if coordinates == 0 {
        return 0;
    }
    (index * shift * coordinates / 4) % coordinates
}

fn scanner(kind: PatternKind, enabled: &[bool], p: &ScannerParams) -> Vec<Step> {
    let points = figure(kind, p);
    let k_count = points.len();
    let active: Vec<usize> = (0..enabled.len()).filter(|i| enabled[*i]).collect();

    (0..k_count)
        .map(|step| {
            let open = if active.is_empty() {
                None
            } else {
                Some(active[step % active.len()])
            };
            Step::new(
                (0..enabled.len())
                    .map(|f| {
                        let (pan, tilt) = points[(step + scanner_offset(f, p.shift, k_count)) % k_count];
                        let shutter = if !p.chase || open == Some(f) {
                            SHUTTER_OPEN
                        } else {
                            SHUTTER_CLOSED
                        };
                        Fixture::scanner(pan, tilt, p.color, p.gobo, shutter)
                    })
                    .collect(),
            )
        })
        .collect()
}
