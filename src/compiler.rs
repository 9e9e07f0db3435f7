//! Position compiler.
//!
//! Expands the logical steps of a pattern into one dense column of
//! [`FixtureBuffer`]s per fixture (fade-up, hold, fade-down and black
//! regions), then transposes the columns into per-tick [`Position`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::dmx_types::Color;
use crate::fade::FadeCurves;
use crate::pattern::{Fixture, FixtureKind, Step};

/// Largest operator shift, in quarter steps.
pub const MAX_SHIFT: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum CompileError {
    #[error("Pattern has no steps")]
    NoSteps,
    #[error("Sequence has no fixtures")]
    NoFixtures,
    #[error("Fade envelope is empty")]
    EmptyEnvelope,
    #[error("Step {step} has {found} fixtures, expected {expected}")]
    Arity {
        step: usize,
        expected: usize,
        found: usize,
    },
}

/// Operator-controlled state of one fixture slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FixtureState {
    pub enabled: bool,
    /// Swap lit and dark cells for this fixture.
    pub rgb_invert: bool,
    /// Walk the steps last-to-first for this fixture.
    pub pattern_reverse: bool,
}

impl Default for FixtureState {
    fn default() -> Self {
        Self {
            enabled: true,
            rgb_invert: false,
            pattern_reverse: false,
        }
    }
}

/// One fully resolved output sample for one fixture at one tick.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct FixtureBuffer {
    /// Already scaled by the fade envelope.
    pub color: Color,
    pub master: u8,
    /// Envelope level of this sample; 0 means the lamp is dark.
    pub brightness: u8,
    pub pan: u8,
    pub tilt: u8,
    pub shutter: u8,
    pub gobo: u8,
    pub enabled: bool,
}

impl FixtureBuffer {
    pub fn is_on(&self) -> bool {
        self.brightness > 0
    }
}

/// Final values of every enabled fixture for one tick.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct Position {
    pub fixtures: BTreeMap<usize, FixtureBuffer>,
}

impl Position {
    pub fn get(&self, index: usize) -> Option<&FixtureBuffer> {
        self.fixtures.get(&index)
    }

    pub fn insert(&mut self, index: usize, buffer: FixtureBuffer) {
        self.fixtures.insert(index, buffer);
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct CompileParams {
    pub kind: FixtureKind,
    /// Play the steps forward then backward.
    pub bounce: bool,
    /// Play the steps backward only. Ignored while bouncing.
    pub scanner_invert: bool,
    /// Overlap of neighbouring fixtures in quarter steps, `0..=MAX_SHIFT`.
    pub shift: usize,
    /// Drop entries that repeat the previous tick's value.
    pub optimisation: bool,
}

/// A compiled playout: one [`Position`] per tick.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct Playout {
    /// What is sent each tick. With optimisation on, a fixture whose buffer
    /// repeats the previous tick is left out.
    pub positions: Vec<Arc<Position>>,
    /// Every enabled fixture at every tick. Sent when the actors cannot be
    /// assumed to hold the previous tick.
    pub full: Vec<Arc<Position>>,
    /// Ticks spent on one logical step.
    pub ticks_per_step: usize,
}

impl Playout {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, tick: usize) -> Option<&Arc<Position>> {
        self.positions.get(tick)
    }

    pub fn get_full(&self, tick: usize) -> Option<&Arc<Position>> {
        self.full.get(tick)
    }
}

/// How a single cell of a fixture's column is rendered.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Transition {
    /// Fade up, hold, fade down. A color repeated from the previous step
    /// replays its full pulse.
    Pulse,
    /// Key step: full level with no ramps.
    Solid,
    /// Dark for the length of a black cell.
    BlackHold,
    /// Inverted lit cell: dark for the length of a lit cell.
    Dark,
    /// Inverted black cell: lit with the fixture's color, ramping up out of
    /// a dark neighbour and down into one.
    Lift { rise: bool, fall: bool },
}

impl Transition {
    fn between(prev: &Fixture, this: &Fixture, next: &Fixture, key: bool, invert: bool) -> Self {
        match (invert, this.is_lit()) {
            (false, true) if key => Transition::Solid,
            (false, true) => Transition::Pulse,
            (false, false) => Transition::BlackHold,
            (true, true) => Transition::Dark,
            (true, false) if key => Transition::Lift {
                rise: false,
                fall: false,
            },
            (true, false) => Transition::Lift {
                rise: prev.is_lit(),
                fall: next.is_lit(),
            },
        }
    }
}

struct Expander<'a> {
    steps: &'a [Step],
    curves: &'a FadeCurves,
    params: &'a CompileParams,
    envelope: Vec<u8>,
    rise: Vec<u8>,
    fall: Vec<u8>,
    unit: usize,
    gap: usize,
}

impl<'a> Expander<'a> {
    fn new(steps: &'a [Step], curves: &'a FadeCurves, params: &'a CompileParams) -> Self {
        let (unit, gap) = match params.kind {
            FixtureKind::Rgb => {
                let unit = curves.unit_len();
                (unit, unit - params.shift.min(MAX_SHIFT) * (unit / 4))
            }
            FixtureKind::Scanner => (1, 1),
        };
        Self {
            steps,
            curves,
            params,
            envelope: curves.envelope(),
            rise: curves.rise(),
            fall: curves.fall(),
            unit,
            gap,
        }
    }

    fn order(&self, state: &FixtureState) -> Vec<usize> {
        let n = self.steps.len();
        let backwards = state.pattern_reverse ^ (self.params.scanner_invert && !self.params.bounce);
        let base: Vec<usize> = if backwards {
            (0..n).rev().collect()
        } else {
            (0..n).collect()
        };
        if self.params.bounce {
            base.iter().chain(base.iter().rev()).copied().collect()
        } else {
            base
        }
    }

    fn column(&self, index: usize, state: &FixtureState) -> Vec<FixtureBuffer> {
        let order = self.order(state);
        match self.params.kind {
            FixtureKind::Rgb => self.rgb_column(index, state, &order),
            FixtureKind::Scanner => self.scanner_column(index, state, &order),
        }
    }

    fn sample(cell: &Fixture, color: Color, level: u8, enabled: bool) -> FixtureBuffer {
        FixtureBuffer {
            color: color.scale(level),
            master: cell.master,
            brightness: level,
            pan: cell.pan,
            tilt: cell.tilt,
            shutter: cell.shutter,
            gobo: cell.gobo,
            enabled,
        }
    }

    /// Color an inverted fixture shows in its dark cells: its own first lit
    /// color, else the first lit color of the pattern, else white.
    fn invert_color(&self, index: usize) -> Color {
        let own = self
            .steps
            .iter()
            .map(|s| s.fixtures[index].color)
            .find(Color::has_color);
        own.or_else(|| {
            self.steps
                .iter()
                .flat_map(|s| s.fixtures.iter())
                .map(|f| f.color)
                .find(Color::has_color)
        })
        .unwrap_or(Color::WHITE)
    }

    fn rgb_column(&self, index: usize, state: &FixtureState, order: &[usize]) -> Vec<FixtureBuffer> {
        let size = self.curves.size;
        let enabled = state.enabled;
        let invert_color = self.invert_color(index);
        let len = order.len();
        let mut out = Vec::with_capacity(len * self.unit);

        for pos in 0..len {
            let step = &self.steps[order[pos]];
            let this = &step.fixtures[index];
            let prev = &self.steps[order[(pos + len - 1) % len]].fixtures[index];
            let next = &self.steps[order[(pos + 1) % len]].fixtures[index];

            match Transition::between(prev, this, next, step.key_step, state.rgb_invert) {
                Transition::Pulse => out.extend(
                    self.envelope
                        .iter()
                        .map(|v| Self::sample(this, this.color, *v, enabled)),
                ),
                Transition::Solid => out.extend(
                    (0..self.unit).map(|_| Self::sample(this, this.color, size, enabled)),
                ),
                Transition::BlackHold => out.extend(
                    (0..self.gap).map(|_| Self::sample(this, Color::BLACK, 0, enabled)),
                ),
                Transition::Dark => out.extend(
                    (0..self.unit).map(|_| Self::sample(this, Color::BLACK, 0, enabled)),
                ),
                Transition::Lift { rise, fall } => out.extend((0..self.gap).map(|i| {
                    let up = match self.rise.get(i) {
                        Some(v) if rise => *v,
                        _ => size,
                    };
                    let from_end = self.gap - 1 - i;
                    let down = match self.fall.len().checked_sub(from_end + 1) {
                        Some(j) if fall => self.fall[j],
                        _ => size,
                    };
                    Self::sample(this, invert_color, up.min(down), enabled)
                })),
            }
        }
        out
    }

    /// Scanners move one coordinate per tick; only pan/tilt change and the
    /// shutter keeps the step's value.
    fn scanner_column(
        &self,
        index: usize,
        state: &FixtureState,
        order: &[usize],
    ) -> Vec<FixtureBuffer> {
        order
            .iter()
            .map(|i| {
                let cell = &self.steps[*i].fixtures[index];
                FixtureBuffer {
                    color: cell.color,
                    master: cell.master,
                    brightness: if cell.is_lit() { cell.brightness } else { 0 },
                    pan: cell.pan,
                    tilt: cell.tilt,
                    shutter: cell.shutter,
                    gobo: cell.gobo,
                    enabled: state.enabled,
                }
            })
            .collect()
    }
}

/// Compiles `steps` into a playout for `states.len()` fixtures.
pub fn compile(
    steps: &[Step],
    states: &[FixtureState],
    curves: &FadeCurves,
    params: &CompileParams,
) -> Result<Playout, CompileError> {
    if steps.is_empty() {
        return Err(CompileError::NoSteps);
    }
    if states.is_empty() {
        return Err(CompileError::NoFixtures);
    }
    if curves.up.len() < 2 || curves.down.len() != curves.up.len() {
        return Err(CompileError::EmptyEnvelope);
    }
    for (step, s) in steps.iter().enumerate() {
        if s.fixtures.len() != states.len() {
            return Err(CompileError::Arity {
                step,
                expected: states.len(),
                found: s.fixtures.len(),
            });
        }
    }

    let expander = Expander::new(steps, curves, params);
    let columns: Vec<Vec<FixtureBuffer>> = states
        .iter()
        .enumerate()
        .map(|(index, state)| expander.column(index, state))
        .collect();

    let enabled: Vec<usize> = states
        .iter()
        .enumerate()
        .filter(|(_, s)| s.enabled)
        .map(|(i, _)| i)
        .collect();

    // Columns can differ in length when black cells are shortened by the
    // shift; every fixture plays the common prefix.
    let ticks = enabled
        .iter()
        .map(|i| columns[*i].len())
        .min()
        .or_else(|| columns.iter().map(Vec::len).min())
        .unwrap_or(0);

    let full: Vec<Arc<Position>> = (0..ticks)
        .map(|t| {
            let mut position = Position::default();
            for index in &enabled {
                position.insert(*index, columns[*index][t]);
            }
            Arc::new(position)
        })
        .collect();

    let positions = if params.optimisation {
        (0..ticks)
            .map(|t| {
                if t == 0 {
                    return full[0].clone();
                }
                let mut position = Position::default();
                for index in &enabled {
                    let buffer = columns[*index][t];
                    if columns[*index][t - 1] != buffer {
                        position.insert(*index, buffer);
                    }
                }
                Arc::new(position)
            })
            .collect()
    } else {
        full.clone()
    };

    Ok(Playout {
        positions,
        full,
        ticks_per_step: expander.unit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fade::fade_curves;
    use crate::pattern::{PatternKind, PatternParams, ScannerParams, generate};

    fn steps(kind: PatternKind, n: usize) -> Vec<Step> {
        let enabled = vec![true; n];
        generate(
            kind,
            &PatternParams {
                enabled: &enabled,
                color: Color::GREEN,
                scanner: ScannerParams::default(),
            },
        )
        .unwrap()
        .steps
    }

    fn curves() -> FadeCurves {
        fade_curves(10, 4, 255).unwrap()
    }

    fn column(playout: &Playout, index: usize) -> Vec<FixtureBuffer> {
        playout
            .positions
            .iter()
            .map(|p| *p.get(index).expect("fixture present at every tick"))
            .collect()
    }

    fn on_ticks(playout: &Playout, index: usize) -> Vec<bool> {
        column(playout, index).iter().map(|b| b.is_on()).collect()
    }

    #[test]
    fn compile_is_deterministic() {
        let s = steps(PatternKind::MultiColor, 6);
        let states = vec![FixtureState::default(); 6];
        let params = CompileParams {
            shift: 2,
            bounce: true,
            ..Default::default()
        };
        let a = compile(&s, &states, &curves(), &params).unwrap();
        let b = compile(&s, &states, &curves(), &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn chase_plays_one_fixture_per_step_unit() {
        let s = steps(PatternKind::Chase, 8);
        let states = vec![FixtureState::default(); 8];
        let c = curves();
        let playout = compile(&s, &states, &c, &CompileParams::default()).unwrap();
        let unit = c.unit_len();
        assert_eq!(playout.len(), 8 * unit);
        assert_eq!(playout.ticks_per_step, unit);

        for (t, position) in playout.positions.iter().enumerate() {
            let active = t / unit;
            for (index, buffer) in position.fixtures.iter() {
                assert_eq!(buffer.is_on(), *index == active, "tick {t} fixture {index}");
                if *index != active {
                    assert_eq!(buffer.color, Color::BLACK);
                }
            }
        }
        // The peak of fixture 1's step is full green.
        let peak = playout.get(unit + 9).unwrap().get(1).unwrap();
        assert_eq!(peak.color, Color::GREEN);
    }

    #[test]
    fn shift_rotates_each_fixture_by_the_black_cell() {
        let s = steps(PatternKind::Chase, 4);
        let states = vec![FixtureState::default(); 4];
        let c = curves();
        for shift in 0..=MAX_SHIFT {
            let params = CompileParams {
                shift,
                ..Default::default()
            };
            let playout = compile(&s, &states, &c, &params).unwrap();
            let unit = c.unit_len();
            let gap = unit - shift * (unit / 4);
            let total = playout.len();
            assert_eq!(total, unit + 3 * gap);

            let base = column(&playout, 0);
            for k in 1..4 {
                let mut rotated = base.clone();
                rotated.rotate_right((k * gap) % total);
                assert_eq!(column(&playout, k), rotated, "shift {shift} fixture {k}");
            }
        }
    }

    #[test]
    fn bounce_mirrors_the_stream() {
        let s = steps(PatternKind::Chase, 4);
        let states = vec![FixtureState::default(); 4];
        let params = CompileParams {
            bounce: true,
            shift: 1,
            ..Default::default()
        };
        let playout = compile(&s, &states, &curves(), &params).unwrap();
        let half = playout.len() / 2;
        assert_eq!(playout.len() % 2, 0);
        for index in 0..4 {
            let col = column(&playout, index);
            let mut second: Vec<FixtureBuffer> = col[half..].to_vec();
            second.reverse();
            assert_eq!(&col[..half], &second[..], "fixture {index}");
        }
    }

    #[test]
    fn invert_complements_the_lit_ticks() {
        let s = steps(PatternKind::Chase, 4);
        let plain = vec![FixtureState::default(); 4];
        let mut inverted = plain.clone();
        inverted[2].rgb_invert = true;

        for shift in [0, 2] {
            let params = CompileParams {
                shift,
                ..Default::default()
            };
            let a = compile(&s, &plain, &curves(), &params).unwrap();
            let b = compile(&s, &inverted, &curves(), &params).unwrap();
            assert_eq!(a.len(), b.len());
            let before = on_ticks(&a, 2);
            let after = on_ticks(&b, 2);
            assert!(before.iter().zip(&after).all(|(x, y)| x != y));
            // Other fixtures are untouched.
            assert_eq!(column(&a, 1), column(&b, 1));
            // Inverted lamp shows the chase color.
            let lit = column(&b, 2).into_iter().find(|f| f.brightness == 255).unwrap();
            assert_eq!(lit.color, Color::GREEN);
        }
    }

    #[test]
    fn inverted_cells_ramp_at_their_edges() {
        let s = steps(PatternKind::Chase, 2);
        let mut states = vec![FixtureState::default(); 2];
        states[0].rgb_invert = true;
        let c = curves();
        let playout = compile(&s, &states, &c, &CompileParams::default()).unwrap();
        let col = column(&playout, 0);
        let unit = c.unit_len();
        // Step 0 is dark, step 1 lifts out of and back into darkness.
        assert!(col[..unit].iter().all(|b| !b.is_on()));
        let lifted: Vec<u8> = col[unit..].iter().map(|b| b.brightness).collect();
        assert_eq!(lifted, c.envelope());
    }

    #[test]
    fn disabled_fixtures_never_appear() {
        let s = steps(PatternKind::Chase, 4);
        let mut states = vec![FixtureState::default(); 4];
        let params = CompileParams::default();
        let full = compile(&s, &states, &curves(), &params).unwrap();
        states[1].enabled = false;
        let partial = compile(&s, &states, &curves(), &params).unwrap();

        assert_eq!(full.len(), partial.len());
        for (a, b) in full.positions.iter().zip(partial.positions.iter()) {
            assert!(b.get(1).is_none());
            for index in [0, 2, 3] {
                assert_eq!(a.get(index), b.get(index));
            }
        }
    }

    #[test]
    fn pairs_keep_half_the_fixtures_lit() {
        let s = steps(PatternKind::Pairs, 8);
        let states = vec![FixtureState::default(); 8];
        let playout = compile(&s, &states, &curves(), &CompileParams::default()).unwrap();
        for position in playout.positions.iter() {
            let lit = position.fixtures.values().filter(|b| b.is_on()).count();
            assert_eq!(lit, 4);
        }
    }

    #[test]
    fn flash_key_steps_do_not_fade() {
        let s = steps(PatternKind::Flash, 3);
        let states = vec![FixtureState::default(); 3];
        let c = curves();
        let playout = compile(&s, &states, &c, &CompileParams::default()).unwrap();
        let col = column(&playout, 0);
        let unit = c.unit_len();
        assert_eq!(col.len(), 2 * unit);
        assert!(col[..unit].iter().all(|b| b.brightness == 255));
        assert!(col[unit..].iter().all(|b| b.brightness == 0));
    }

    #[test]
    fn optimisation_drops_repeated_entries() {
        let s = steps(PatternKind::Chase, 4);
        let states = vec![FixtureState::default(); 4];
        let c = curves();
        let params = CompileParams {
            optimisation: true,
            ..Default::default()
        };
        let playout = compile(&s, &states, &c, &params).unwrap();
        assert_eq!(playout.get(0).unwrap().fixtures.len(), 4);
        // Fixture 3 stays black through the first step, so it is only sent once.
        assert!(
            playout.positions[1..c.unit_len()]
                .iter()
                .all(|p| p.get(3).is_none())
        );
        // Fixture 0 is fading up, so it changes every tick.
        assert!(playout.get(1).unwrap().get(0).is_some());
        // The full table still holds every fixture at every tick.
        assert_eq!(playout.full.len(), playout.len());
        assert!(playout.full.iter().all(|p| p.fixtures.len() == 4));
        assert_eq!(playout.get_full(5).unwrap().get(3).map(|b| b.brightness), Some(0));
    }

    #[test]
    fn scanners_move_one_coordinate_per_tick() {
        let s = steps(PatternKind::Circle, 2);
        let states = vec![FixtureState::default(); 2];
        let params = CompileParams {
            kind: FixtureKind::Scanner,
            ..Default::default()
        };
        let playout = compile(&s, &states, &curves(), &params).unwrap();
        assert_eq!(playout.len(), s.len());
        assert_eq!(playout.ticks_per_step, 1);
        for (t, position) in playout.positions.iter().enumerate() {
            let b = position.get(0).unwrap();
            assert_eq!((b.pan, b.tilt), (s[t].fixtures[0].pan, s[t].fixtures[0].tilt));
            assert_eq!(b.shutter, s[t].fixtures[0].shutter);
        }

        let reversed = compile(
            &s,
            &states,
            &curves(),
            &CompileParams {
                scanner_invert: true,
                ..params
            },
        )
        .unwrap();
        let last = s.len() - 1;
        assert_eq!(reversed.get(0).unwrap().get(0).unwrap().pan, s[last].fixtures[0].pan);
    }

    #[test]
    fn malformed_input_is_rejected() {
        let s = steps(PatternKind::Chase, 4);
        let c = curves();
        let params = CompileParams::default();
        assert_eq!(
            compile(&s, &vec![FixtureState::default(); 5], &c, &params),
            Err(CompileError::Arity {
                step: 0,
                expected: 5,
                found: 4
            })
        );
        assert_eq!(
            compile(&[], &vec![FixtureState::default(); 4], &c, &params),
            Err(CompileError::NoSteps)
        );
        let empty = FadeCurves {
            up: vec![],
            down: vec![],
            on_hold: vec![],
            size: 255,
        };
        assert_eq!(
            compile(&s, &vec![FixtureState::default(); 4], &empty, &params),
            Err(CompileError::EmptyEnvelope)
        );
    }
}
