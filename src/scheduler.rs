//! Tick scheduler.
//!
//! One scheduler thread per sequence. It owns the [`Sequence`] and its
//! compiled [`Playout`], applies operator commands between ticks, and
//! delivers one [`Frame`] per tick to every fixture actor of the sequence.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{
    Receiver, RecvError, SendTimeoutError, Sender, after, never, select,
};
use log::{debug, error, info, warn};

use crate::compiler::{FixtureBuffer, Playout, Position};
use crate::dmx_types::Color;
use crate::fade::fade_curves;
use crate::fixture::{FixtureCommand, Frame};
use crate::pattern::{CENTER, SHUTTER_CLOSED, SHUTTER_OPEN};
use crate::sequence::{Change, PlayState, Sequence, SequenceCommand, SequenceError};

/// How long a switch override may wait for a busy fixture.
pub const SWITCH_TIMEOUT: Duration = Duration::from_millis(10);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

/// Outcome of a scheduler operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flow {
    Continue,
    /// A stop arrived while frames were still being delivered.
    Cancelled,
    Exit,
}

pub struct Scheduler {
    sequence: Sequence,
    playout: Playout,
    cursor: usize,
    state: PlayState,
    /// State to return to when a flood ends.
    resume: PlayState,
    commands: Receiver<SequenceCommand>,
    beats: Receiver<()>,
    fixtures: Vec<Sender<FixtureCommand>>,
    backlog: VecDeque<SequenceCommand>,
    /// Last playout position delivered, shown again after a flood.
    shown: Arc<Position>,
    /// The actors no longer hold the previous tick; the next emit sends
    /// every fixture.
    resync: bool,
    label: Arc<str>,
}

impl Scheduler {
    /// Compiles the initial playout. Fails if the sequence cannot be played.
    pub fn new(
        sequence: Sequence,
        commands: Receiver<SequenceCommand>,
        beats: Receiver<()>,
        fixtures: Vec<Sender<FixtureCommand>>,
    ) -> Result<Self, SequenceError> {
        let playout = sequence.compile()?;
        let label = Arc::from(sequence.label.as_str());
        Ok(Self {
            sequence,
            playout,
            cursor: 0,
            state: PlayState::Idle,
            resume: PlayState::Idle,
            commands,
            beats,
            fixtures,
            backlog: VecDeque::new(),
            shown: Arc::new(Position::default()),
            resync: false,
            label,
        })
    }

    pub fn spawn(self) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("sequence-{}", self.sequence.number))
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        info!(
            "Sequence {} ({}) ready: {} fixtures, {} ticks",
            self.sequence.number,
            self.sequence.name,
            self.fixtures.len(),
            self.playout.len()
        );
        loop {
            if self.pump() == Flow::Exit {
                break;
            }
            if self.state != PlayState::Running {
                match self.commands.recv() {
                    Ok(cmd) => self.backlog.push_back(cmd),
                    Err(_) => break,
                }
                continue;
            }
            if self.awaiting_beat() {
                match self.wait_for_beat() {
                    Flow::Continue => {}
                    Flow::Cancelled => continue,
                    Flow::Exit => break,
                }
            }
            match self.emit() {
                Flow::Continue => {}
                Flow::Cancelled => continue,
                Flow::Exit => break,
            }
            if self.wait() == Flow::Exit {
                break;
            }
        }
        for tx in &self.fixtures {
            let _ = tx.send_timeout(FixtureCommand::Shutdown, SHUTDOWN_TIMEOUT);
        }
        info!("Sequence {} stopped", self.sequence.number);
    }

    /// Applies queued and pending commands in arrival order.
    pub fn pump(&mut self) -> Flow {
        loop {
            let cmd = match self.backlog.pop_front() {
                Some(cmd) => cmd,
                None => match self.commands.try_recv() {
                    Ok(cmd) => cmd,
                    Err(e) if e.is_disconnected() => return Flow::Exit,
                    Err(_) => return Flow::Continue,
                },
            };
            if self.handle(cmd) == Flow::Exit {
                return Flow::Exit;
            }
        }
    }

    /// Applies a single command.
    pub fn handle(&mut self, cmd: SequenceCommand) -> Flow {
        debug!("Sequence {} <- {cmd}", self.sequence.number);
        match cmd {
            SequenceCommand::Start => {
                if self.state == PlayState::Flood {
                    self.resume = PlayState::Running;
                } else {
                    self.state = PlayState::Running;
                }
                Flow::Continue
            }
            SequenceCommand::Stop => {
                self.state = PlayState::Idle;
                self.resume = PlayState::Idle;
                Flow::Continue
            }
            SequenceCommand::Clear => {
                self.resync = true;
                self.state = PlayState::Cleared;
                self.resume = PlayState::Idle;
                let off = Arc::new(self.off_position());
                self.shown = off.clone();
                let flow = self.broadcast(off);
                self.cursor = 0;
                self.state = PlayState::Idle;
                flow.max_exit()
            }
            SequenceCommand::StartFlood(color) => {
                if self.state != PlayState::Flood {
                    self.resume = self.state;
                }
                self.state = PlayState::Flood;
                self.resync = true;
                self.broadcast(Arc::new(self.flood_position(color))).max_exit()
            }
            SequenceCommand::StopFlood => {
                if self.state != PlayState::Flood {
                    return Flow::Continue;
                }
                self.state = self.resume;
                match self.state {
                    PlayState::Running => Flow::Continue,
                    PlayState::Static => self.show_static(),
                    _ => self.broadcast(self.shown.clone()).max_exit(),
                }
            }
            SequenceCommand::SetStatic(colors) => {
                if !colors.is_empty() {
                    self.sequence.static_colors = colors;
                }
                self.state = PlayState::Static;
                self.show_static()
            }
            SequenceCommand::OverrideSwitch { switch, state } => {
                self.override_switch(switch, state);
                Flow::Continue
            }
            SequenceCommand::Shutdown => Flow::Exit,
            cmd => {
                self.update(&cmd);
                Flow::Continue
            }
        }
    }

    /// Applies a parameter change. Structural changes are compiled into a
    /// fresh playout first; if that fails the old playout keeps playing.
    fn update(&mut self, cmd: &SequenceCommand) {
        let mut candidate = self.sequence.clone();
        match candidate.apply(cmd) {
            Change::None | Change::Control => {}
            Change::Timing => self.sequence = candidate,
            Change::Output => {
                self.sequence = candidate;
                // Empty position: actors re-render their last buffer. Sent
                // even while running, a beat-gated sequence may not tick.
                self.broadcast(Arc::new(Position::default()));
            }
            Change::Structure { reset } => match candidate.compile() {
                Ok(playout) => {
                    let disabled: Vec<usize> = self
                        .sequence
                        .fixtures
                        .iter()
                        .zip(&candidate.fixtures)
                        .enumerate()
                        .filter(|(_, (old, new))| old.enabled && !new.enabled)
                        .map(|(i, _)| i)
                        .collect();
                    self.sequence = candidate;
                    self.playout = playout;
                    self.resync = true;
                    if reset || self.cursor >= self.playout.len() {
                        self.cursor = 0;
                    }
                    for index in disabled {
                        self.switch_off(index);
                    }
                    if self.state == PlayState::Static {
                        self.show_static();
                    }
                }
                Err(e) => error!(
                    "Sequence {}: {cmd} rejected, keeping the current playout: {e}",
                    self.sequence.number
                ),
            },
        }
    }

    /// Delivers the position at the cursor and advances it.
    pub fn emit(&mut self) -> Flow {
        let table = if self.resync {
            &self.playout.full
        } else {
            &self.playout.positions
        };
        let Some(position) = table.get(self.cursor).cloned() else {
            warn!("Sequence {}: empty playout, stopping", self.sequence.number);
            self.state = PlayState::Idle;
            return Flow::Continue;
        };
        if let Some(full) = self.playout.get_full(self.cursor) {
            self.shown = full.clone();
        }
        let flow = self.broadcast(position);
        if flow != Flow::Continue {
            return flow;
        }
        self.resync = false;
        self.cursor += 1;
        if self.cursor >= self.playout.len() {
            self.cursor = 0;
            self.wrapped();
        }
        Flow::Continue
    }

    fn wrapped(&mut self) {
        if !self.sequence.auto_color && !self.sequence.auto_pattern {
            return;
        }
        let mut candidate = self.sequence.clone();
        if candidate.auto_color {
            candidate.next_color();
        }
        if candidate.auto_pattern {
            candidate.pattern = candidate.pattern.next();
        }
        match candidate.compile() {
            Ok(playout) => {
                debug!(
                    "Sequence {}: now {} in {}",
                    candidate.number,
                    candidate.pattern,
                    candidate.colors.first().map(Color::to_hex).unwrap_or_default()
                );
                self.sequence = candidate;
                self.playout = playout;
            }
            Err(e) => error!("Sequence {}: auto change failed: {e}", self.sequence.number),
        }
    }

    fn frame(&self, position: Arc<Position>) -> FixtureCommand {
        FixtureCommand::Frame(Frame {
            position,
            master: self.sequence.master,
            blackout: self.sequence.blackout,
            strobe: self.sequence.strobe,
            strobe_speed: self.sequence.strobe_speed,
            label: self.label.clone(),
        })
    }

    /// Sends a frame to every actor, waiting for room in each channel. A stop
    /// arriving meanwhile cancels the rest of the delivery.
    fn broadcast(&mut self, position: Arc<Position>) -> Flow {
        let cmd = self.frame(position);
        for index in 0..self.fixtures.len() {
            let tx = self.fixtures[index].clone();
            loop {
                let arrived = select! {
                    send(tx, cmd.clone()) -> res => {
                        if res.is_err() {
                            warn!("Sequence {}: fixture {index} is gone", self.sequence.number);
                        }
                        None
                    },
                    recv(self.commands) -> msg => Some(msg),
                };
                let Some(msg) = arrived else {
                    break;
                };
                let stop = matches!(msg, Ok(SequenceCommand::Stop | SequenceCommand::Shutdown));
                if self.queue(msg) == Flow::Exit {
                    return Flow::Exit;
                }
                if stop {
                    return Flow::Cancelled;
                }
            }
        }
        Flow::Continue
    }

    fn queue(&mut self, msg: Result<SequenceCommand, RecvError>) -> Flow {
        match msg {
            Ok(cmd) => {
                self.backlog.push_back(cmd);
                Flow::Continue
            }
            Err(_) => Flow::Exit,
        }
    }

    /// Sleeps one tick interval, waking early for commands.
    fn wait(&mut self) -> Flow {
        let interval = self.sequence.tick_interval(self.playout.ticks_per_step);
        let arrived = select! {
            recv(self.commands) -> msg => Some(msg),
            recv(after(interval)) -> _ => None,
        };
        match arrived {
            Some(msg) => self.queue(msg),
            None => Flow::Continue,
        }
    }

    fn awaiting_beat(&self) -> bool {
        self.sequence.music_trigger && self.cursor % self.playout.ticks_per_step.max(1) == 0
    }

    /// Blocks at a step boundary until a beat arrives. Returns `Cancelled`
    /// when a command arrives first.
    fn wait_for_beat(&mut self) -> Flow {
        let arrived = select! {
            recv(self.beats) -> beat => Err(beat.is_ok()),
            recv(self.commands) -> msg => Ok(msg),
        };
        match arrived {
            Err(true) => Flow::Continue,
            Err(false) => {
                warn!("Sequence {}: beat source closed", self.sequence.number);
                self.beats = never();
                self.sequence.music_trigger = false;
                Flow::Continue
            }
            Ok(msg) => match self.queue(msg) {
                Flow::Exit => Flow::Exit,
                _ => Flow::Cancelled,
            },
        }
    }

    fn override_switch(&mut self, switch: usize, state: usize) {
        let number = self.sequence.number;
        let Some(sw) = self.sequence.switches.get(switch) else {
            warn!("Sequence {number}: no switch {switch}");
            return;
        };
        let Some(st) = sw.states.get(state) else {
            warn!("Sequence {number}: switch {} has no state {state}", sw.name);
            return;
        };
        let Some(tx) = self.fixtures.get(sw.fixture) else {
            warn!("Sequence {number}: switch {} drives a missing fixture", sw.name);
            return;
        };
        match tx.send_timeout(FixtureCommand::Override(st.clone()), SWITCH_TIMEOUT) {
            Ok(()) => info!("Sequence {number}: switch {} -> {}", sw.name, st.label),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!("Sequence {number}: fixture busy, switch {} dropped", sw.name)
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                warn!("Sequence {number}: switch {} has no fixture", sw.name)
            }
        }
    }

    /// Sends a dark frame to a single fixture that was just disabled.
    fn switch_off(&mut self, index: usize) {
        let mut position = Position::default();
        position.insert(index, off_buffer(false));
        if let Some(tx) = self.fixtures.get(index) {
            let _ = tx.send_timeout(self.frame(Arc::new(position)), SWITCH_TIMEOUT);
        }
    }

    fn enabled(&self) -> impl Iterator<Item = usize> + '_ {
        self.sequence
            .fixtures
            .iter()
            .enumerate()
            .filter(|(_, f)| f.enabled)
            .map(|(i, _)| i)
    }

    fn off_position(&self) -> Position {
        let mut position = Position::default();
        for index in self.enabled() {
            position.insert(index, off_buffer(true));
        }
        position
    }

    fn flood_position(&self, color: Color) -> Position {
        let mut position = Position::default();
        for index in self.enabled() {
            position.insert(index, lit_buffer(color, 255));
        }
        position
    }

    fn static_position(&self, level: u8) -> Position {
        let colors = &self.sequence.static_colors;
        let mut position = Position::default();
        for (slot, index) in self.enabled().enumerate() {
            let color = colors.get(slot % colors.len().max(1)).copied().unwrap_or(Color::WHITE);
            position.insert(index, lit_buffer(color.scale(level), level));
        }
        position
    }

    /// Shows the static colors, fading them up first when configured to.
    fn show_static(&mut self) -> Flow {
        self.resync = true;
        let size = self.sequence.size;
        if self.sequence.static_fade {
            match fade_curves(self.sequence.coordinates, 1, size) {
                Ok(curves) => {
                    let interval = self.sequence.tick_interval(curves.up.len());
                    for level in curves.up {
                        match self.broadcast(Arc::new(self.static_position(level))) {
                            Flow::Continue => {}
                            flow => return flow.max_exit(),
                        }
                        let arrived = select! {
                            recv(self.commands) -> msg => Some(msg),
                            recv(after(interval)) -> _ => None,
                        };
                        if let Some(msg) = arrived {
                            if self.queue(msg) == Flow::Exit {
                                return Flow::Exit;
                            }
                        }
                    }
                }
                Err(e) => warn!("Sequence {}: static fade skipped: {e}", self.sequence.number),
            }
        }
        let position = Arc::new(self.static_position(size));
        self.shown = position.clone();
        self.broadcast(position).max_exit()
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn playout(&self) -> &Playout {
        &self.playout
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }
}

impl Flow {
    /// Keeps only `Exit`; a cancelled one-off delivery is not an error.
    fn max_exit(self) -> Flow {
        match self {
            Flow::Exit => Flow::Exit,
            _ => Flow::Continue,
        }
    }
}

fn off_buffer(enabled: bool) -> FixtureBuffer {
    FixtureBuffer {
        color: Color::BLACK,
        master: 255,
        brightness: 0,
        pan: CENTER,
        tilt: CENTER,
        shutter: SHUTTER_CLOSED,
        gobo: 0,
        enabled,
    }
}

fn lit_buffer(color: Color, level: u8) -> FixtureBuffer {
    FixtureBuffer {
        color,
        master: 255,
        brightness: level,
        pan: CENTER,
        tilt: CENTER,
        shutter: SHUTTER_OPEN,
        gobo: 0,
        enabled: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::SwitchState;
    use crate::pattern::{FixtureKind, PatternKind};
    use crate::sequence::{MAX_SPEED, Switch};
    use crossbeam_channel::{bounded, unbounded};

    struct Rig {
        scheduler: Scheduler,
        commands: Sender<SequenceCommand>,
        outputs: Vec<Receiver<FixtureCommand>>,
    }

    fn rig(sequence: Sequence) -> Rig {
        let (commands, rx) = unbounded();
        let (_beat_tx, beats) = bounded(1);
        let (fixtures, outputs): (Vec<_>, Vec<_>) =
            (0..sequence.fixtures.len()).map(|_| bounded(1)).unzip();
        Rig {
            scheduler: Scheduler::new(sequence, rx, beats, fixtures).unwrap(),
            commands,
            outputs,
        }
    }

    fn frames(rig: &Rig) -> Vec<Frame> {
        rig.outputs
            .iter()
            .filter_map(|rx| match rx.try_recv() {
                Ok(FixtureCommand::Frame(frame)) => Some(frame),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn emit_walks_the_playout_and_wraps() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 4));
        rig.scheduler.handle(SequenceCommand::Start);
        let len = rig.scheduler.playout().len();
        for t in 0..len {
            assert_eq!(rig.scheduler.cursor(), t);
            assert_eq!(rig.scheduler.emit(), Flow::Continue);
            let frames = frames(&rig);
            assert_eq!(frames.len(), 4);
            assert_eq!(frames[0].position, rig.scheduler.playout().positions[t]);
        }
        assert_eq!(rig.scheduler.cursor(), 0);
    }

    #[test]
    fn structural_changes_keep_or_reset_the_cursor() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 4));
        for _ in 0..5 {
            rig.scheduler.emit();
            frames(&rig);
        }
        rig.scheduler.handle(SequenceCommand::UpdateShift(2));
        assert_eq!(rig.scheduler.cursor(), 5);
        rig.scheduler.handle(SequenceCommand::UpdatePattern(PatternKind::Pairs));
        assert_eq!(rig.scheduler.cursor(), 0);
        assert_eq!(rig.scheduler.sequence().pattern, PatternKind::Pairs);
    }

    #[test]
    fn failed_recompile_keeps_the_old_playout() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 4));
        let before = rig.scheduler.playout().clone();
        rig.scheduler.sequence.coordinates = 1;
        rig.scheduler.handle(SequenceCommand::UpdateFade(3));
        assert_eq!(rig.scheduler.playout(), &before);
        assert_eq!(rig.scheduler.sequence().fade, 1);
    }

    #[test]
    fn flood_overrides_and_restores() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 2));
        rig.scheduler.handle(SequenceCommand::StartFlood(Color::BLUE));
        assert_eq!(rig.scheduler.state(), PlayState::Flood);
        let flood = frames(&rig);
        assert_eq!(flood.len(), 2);
        assert!(
            flood[0]
                .position
                .fixtures
                .values()
                .all(|b| b.color == Color::BLUE && b.brightness == 255)
        );
        rig.scheduler.handle(SequenceCommand::StopFlood);
        assert_eq!(rig.scheduler.state(), PlayState::Idle);
    }

    #[test]
    fn start_during_flood_resumes_after_it() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 2));
        rig.scheduler.handle(SequenceCommand::StartFlood(Color::RED));
        frames(&rig);
        rig.scheduler.handle(SequenceCommand::Start);
        assert_eq!(rig.scheduler.state(), PlayState::Flood);
        rig.scheduler.handle(SequenceCommand::StopFlood);
        assert_eq!(rig.scheduler.state(), PlayState::Running);
    }

    #[test]
    fn clear_turns_fixtures_off_and_rewinds() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 3));
        rig.scheduler.handle(SequenceCommand::Start);
        rig.scheduler.emit();
        frames(&rig);
        rig.scheduler.handle(SequenceCommand::Clear);
        assert_eq!(rig.scheduler.state(), PlayState::Idle);
        assert_eq!(rig.scheduler.cursor(), 0);
        let frames = frames(&rig);
        assert_eq!(frames.len(), 3);
        assert!(frames[2].position.fixtures.values().all(|b| !b.is_on()));
    }

    #[test]
    fn static_colors_cycle_over_enabled_fixtures() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 3));
        rig.scheduler
            .handle(SequenceCommand::SetStatic(vec![Color::RED, Color::BLUE]));
        assert_eq!(rig.scheduler.state(), PlayState::Static);
        let frames = frames(&rig);
        let position = &frames[0].position;
        assert_eq!(position.get(0).map(|b| b.color), Some(Color::RED));
        assert_eq!(position.get(1).map(|b| b.color), Some(Color::BLUE));
        assert_eq!(position.get(2).map(|b| b.color), Some(Color::RED));
    }

    #[test]
    fn output_changes_refresh_idle_fixtures() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 2));
        rig.scheduler.handle(SequenceCommand::Blackout(true));
        let frames = frames(&rig);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.blackout && f.position.fixtures.is_empty()));
    }

    #[test]
    fn blocked_delivery_is_cancelled_by_stop() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 2));
        rig.scheduler.handle(SequenceCommand::Start);
        rig.scheduler.emit();
        // Nobody drained the fixtures; the next delivery blocks until Stop.
        rig.commands.send(SequenceCommand::Stop).unwrap();
        assert_eq!(rig.scheduler.emit(), Flow::Cancelled);
        assert_eq!(rig.scheduler.cursor(), 1);
        rig.scheduler.pump();
        assert_eq!(rig.scheduler.state(), PlayState::Idle);
    }

    #[test]
    fn switch_override_times_out_on_a_full_channel() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 2);
        seq.switches = vec![Switch {
            name: "smoke".to_string(),
            fixture: 1,
            states: vec![SwitchState {
                label: "on".to_string(),
                color: Color::WHITE,
                values: vec![],
            }],
        }];
        let mut rig = rig(seq);
        rig.scheduler.handle(SequenceCommand::OverrideSwitch { switch: 0, state: 0 });
        assert!(matches!(
            rig.outputs[1].try_recv(),
            Ok(FixtureCommand::Override(_))
        ));

        rig.scheduler.handle(SequenceCommand::Blackout(true));
        // Fixture 1 now holds a frame; the override is dropped, not queued.
        rig.scheduler.handle(SequenceCommand::OverrideSwitch { switch: 0, state: 0 });
        assert!(matches!(rig.outputs[1].try_recv(), Ok(FixtureCommand::Frame(_))));
        assert!(rig.outputs[1].try_recv().is_err());
    }

    #[test]
    fn disabling_a_fixture_darkens_it() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 3));
        rig.scheduler.handle(SequenceCommand::UpdateFixtureState {
            index: 1,
            enabled: false,
            rgb_invert: false,
            pattern_reverse: false,
        });
        match rig.outputs[1].try_recv() {
            Ok(FixtureCommand::Frame(frame)) => {
                assert_eq!(frame.position.get(1).map(|b| b.is_on()), Some(false))
            }
            other => panic!("expected a dark frame, got {other:?}"),
        }
        assert!(
            rig.scheduler
                .playout()
                .positions
                .iter()
                .all(|p| p.get(1).is_none())
        );
    }

    #[test]
    fn auto_color_advances_on_wrap() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 2);
        seq.colors = vec![Color::RED];
        seq.auto_color = true;
        let mut rig = rig(seq);
        let len = rig.scheduler.playout().len();
        for _ in 0..len {
            rig.scheduler.emit();
            frames(&rig);
        }
        assert_eq!(rig.scheduler.sequence().colors, vec![Color::ORANGE]);
    }

    #[test]
    fn shutdown_exits() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 2));
        rig.commands.send(SequenceCommand::Shutdown).unwrap();
        assert_eq!(rig.scheduler.pump(), Flow::Exit);
    }

    /// Unbounded fixture channels and a live beat source.
    fn beat_rig(sequence: Sequence) -> (Rig, Sender<()>) {
        let (commands, rx) = unbounded();
        let (beat_tx, beats) = bounded(4);
        let (fixtures, outputs): (Vec<_>, Vec<_>) =
            (0..sequence.fixtures.len()).map(|_| unbounded()).unzip();
        let rig = Rig {
            scheduler: Scheduler::new(sequence, rx, beats, fixtures).unwrap(),
            commands,
            outputs,
        };
        (rig, beat_tx)
    }

    #[test]
    fn resuming_after_a_flood_sends_every_fixture() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 8));
        assert!(rig.scheduler.sequence().optimisation);
        rig.scheduler.handle(SequenceCommand::Start);
        for _ in 0..5 {
            rig.scheduler.emit();
            frames(&rig);
        }
        assert!(rig.scheduler.playout().positions[5].fixtures.len() < 8);

        rig.scheduler.handle(SequenceCommand::StartFlood(Color::RED));
        assert_eq!(frames(&rig).len(), 8);
        rig.scheduler.handle(SequenceCommand::StopFlood);
        assert!(frames(&rig).is_empty());

        rig.scheduler.emit();
        let resumed = frames(&rig);
        assert_eq!(resumed.len(), 8);
        assert_eq!(resumed[0].position, rig.scheduler.playout().full[5]);
        assert_eq!(resumed[0].position.fixtures.len(), 8);

        rig.scheduler.emit();
        assert_eq!(frames(&rig)[0].position, rig.scheduler.playout().positions[6]);
    }

    #[test]
    fn recompile_without_reset_sends_every_fixture() {
        let mut rig = rig(Sequence::new(0, "front", FixtureKind::Rgb, 8));
        rig.scheduler.handle(SequenceCommand::Start);
        for _ in 0..28 {
            rig.scheduler.emit();
            frames(&rig);
        }
        rig.scheduler.handle(SequenceCommand::UpdateShift(3));
        assert_eq!(rig.scheduler.cursor(), 28);

        rig.scheduler.emit();
        let frames = frames(&rig);
        assert_eq!(frames[0].position, rig.scheduler.playout().full[28]);
        assert_eq!(frames[0].position.fixtures.len(), 8);
    }

    #[test]
    fn blackout_reaches_a_sequence_waiting_for_a_beat() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 2);
        seq.music_trigger = true;
        let mut rig = rig(seq);
        rig.scheduler.handle(SequenceCommand::Start);
        assert!(frames(&rig).is_empty());

        rig.scheduler.handle(SequenceCommand::Blackout(true));
        let frames = frames(&rig);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.blackout && f.position.fixtures.is_empty()));
    }

    #[test]
    fn static_fade_ramps_up_to_the_size() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 2);
        seq.static_fade = true;
        seq.coordinates = 10;
        seq.speed = MAX_SPEED;
        let (mut rig, _beats) = beat_rig(seq);
        assert_eq!(
            rig.scheduler.handle(SequenceCommand::SetStatic(vec![Color::RED])),
            Flow::Continue
        );

        let levels: Vec<u8> = rig.outputs[0]
            .try_iter()
            .filter_map(|cmd| match cmd {
                FixtureCommand::Frame(frame) => frame.position.get(0).map(|b| b.brightness),
                _ => None,
            })
            .collect();
        let mut expected = fade_curves(10, 1, 255).unwrap().up;
        expected.push(255);
        assert_eq!(levels, expected);
        assert_eq!(levels[0], 0);
        assert!(levels.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(rig.scheduler.state(), PlayState::Static);
        assert_eq!(rig.scheduler.shown.get(0).map(|b| b.color), Some(Color::RED));
    }

    #[test]
    fn music_trigger_plays_one_step_per_beat() {
        let mut seq = Sequence::new(0, "front", FixtureKind::Rgb, 2);
        seq.music_trigger = true;
        seq.speed = MAX_SPEED;
        let (rig, beats) = beat_rig(seq);
        let Rig {
            scheduler,
            commands,
            outputs,
        } = rig;
        let ticks_per_step = scheduler.playout().ticks_per_step;
        let handle = scheduler.spawn().unwrap();
        let quiet = Duration::from_millis(150);
        let count = |rx: &Receiver<FixtureCommand>| {
            let mut n = 0;
            while let Ok(FixtureCommand::Frame(_)) = rx.recv_timeout(quiet) {
                n += 1;
            }
            n
        };

        commands.send(SequenceCommand::Start).unwrap();
        assert!(outputs[0].recv_timeout(quiet).is_err());

        for _ in 0..2 {
            beats.send(()).unwrap();
            assert_eq!(count(&outputs[0]), ticks_per_step);
        }

        commands.send(SequenceCommand::Blackout(true)).unwrap();
        match outputs[0].recv_timeout(quiet) {
            Ok(FixtureCommand::Frame(frame)) => {
                assert!(frame.blackout);
                assert!(frame.position.fixtures.is_empty());
            }
            other => panic!("expected a blackout frame, got {other:?}"),
        }
        assert!(outputs[0].recv_timeout(quiet).is_err());

        // Without a beat source the sequence runs free.
        drop(beats);
        for _ in 0..2 * ticks_per_step {
            let frame = outputs[0].recv_timeout(Duration::from_millis(500));
            assert!(matches!(frame, Ok(FixtureCommand::Frame(_))));
        }

        commands.send(SequenceCommand::Shutdown).unwrap();
        handle.join().unwrap();
        assert!(
            outputs[0]
                .try_iter()
                .any(|cmd| matches!(cmd, FixtureCommand::Shutdown))
        );
    }
}
