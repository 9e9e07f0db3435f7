use std::str::FromStr;

use scan_fmt::scan_fmt;
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::dmx_types::Color;
use crate::pattern::PatternKind;
use crate::sequence::SequenceCommand;

#[derive(Error, Debug, PartialEq)]
pub enum ConsoleError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Invalid sequence: {0}. Sequences are numbered from 1")]
    InvalidSequence(usize),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Missing arguments for command: {0}")]
    MissingArgs(String),
}

/// Where an operator command goes.
#[derive(Clone, PartialEq, Debug)]
pub enum Route {
    /// To one sequence, 0-based.
    Sequence(usize, SequenceCommand),
    /// To every sequence.
    All(SequenceCommand),
    /// A music beat for every sequence.
    Beat,
    Quit,
}

impl TryFrom<String> for Route {
    type Error = ConsoleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let s = value.trim().to_lowercase();
        if s == "quit" || s == "exit" {
            return Ok(Route::Quit);
        }
        if s == "beat" {
            return Ok(Route::Beat);
        }
        if let Ok(state) = scan_fmt!(&s, "blackout {}", String) {
            return Ok(Route::All(SequenceCommand::Blackout(switch("blackout", &state)?)));
        }
        if s == "b/o" || s == "bo" {
            return Ok(Route::All(SequenceCommand::Blackout(true)));
        }
        let head = s.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
        if let Ok((seq, verb)) = scan_fmt!(&head, "seq {} {}", usize, String) {
            let index = seq.checked_sub(1).ok_or(ConsoleError::InvalidSequence(seq))?;
            // Everything after the verb.
            let args: Vec<String> = s.split_whitespace().skip(3).map(str::to_string).collect();
            return Ok(Route::Sequence(index, sequence_command(&verb, &args)?));
        }
        Err(ConsoleError::UnknownCommand(value))
    }
}

impl Route {
    pub fn parse(input: &str) -> Result<Route, ConsoleError> {
        Route::try_from(input.to_string())
    }
}

fn switch(verb: &str, value: &str) -> Result<bool, ConsoleError> {
    match value {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(ConsoleError::InvalidValue(verb.to_string(), value.to_string())),
    }
}

fn number<T: FromStr>(verb: &str, args: &[String]) -> Result<T, ConsoleError> {
    let value = args
        .first()
        .ok_or_else(|| ConsoleError::MissingArgs(verb.to_string()))?;
    value
        .parse()
        .map_err(|_| ConsoleError::InvalidValue(verb.to_string(), value.clone()))
}

/// A numeric argument clamped into `lo..=hi`. Only non-numbers are errors.
fn clamped(verb: &str, args: &[String], lo: i64, hi: i64) -> Result<i64, ConsoleError> {
    let value: i64 = number(verb, args)?;
    Ok(value.clamp(lo, hi))
}

fn byte(verb: &str, args: &[String]) -> Result<u8, ConsoleError> {
    Ok(clamped(verb, args, 0, u8::MAX as i64)? as u8)
}

fn count(verb: &str, args: &[String]) -> Result<usize, ConsoleError> {
    Ok(clamped(verb, args, 0, u16::MAX as i64)? as usize)
}

fn flag(verb: &str, args: &[String]) -> Result<bool, ConsoleError> {
    let value = args
        .first()
        .ok_or_else(|| ConsoleError::MissingArgs(verb.to_string()))?;
    switch(verb, value)
}

fn colors(verb: &str, args: &[String]) -> Result<Vec<Color>, ConsoleError> {
    args.iter()
        .map(|hex| {
            Color::from_hex(hex).ok_or_else(|| ConsoleError::InvalidValue(verb.to_string(), hex.clone()))
        })
        .collect()
}

fn pattern(args: &[String]) -> Result<PatternKind, ConsoleError> {
    let value = args
        .first()
        .ok_or_else(|| ConsoleError::MissingArgs("pattern".to_string()))?;
    if let Ok(number) = value.parse::<usize>() {
        return PatternKind::iter()
            .find(|p| p.number() == number)
            .ok_or_else(|| ConsoleError::InvalidValue("pattern".to_string(), value.clone()));
    }
    PatternKind::from_str(value)
        .map_err(|_| ConsoleError::InvalidValue("pattern".to_string(), value.clone()))
}

/// Parses one sequence verb and its arguments. Shared by the console and OSC.
pub fn sequence_command(verb: &str, args: &[String]) -> Result<SequenceCommand, ConsoleError> {
    let cmd = match verb {
        "start" => SequenceCommand::Start,
        "stop" => SequenceCommand::Stop,
        "clear" => SequenceCommand::Clear,
        "speed" => SequenceCommand::UpdateSpeed(byte(verb, args)?),
        "pattern" => SequenceCommand::UpdatePattern(pattern(args)?),
        "shift" => SequenceCommand::UpdateShift(count(verb, args)?),
        "size" => SequenceCommand::UpdateSize(byte(verb, args)?),
        "fade" => SequenceCommand::UpdateFade(count(verb, args)?),
        "master" => SequenceCommand::UpdateMaster(byte(verb, args)?),
        "blackout" => SequenceCommand::Blackout(flag(verb, args)?),
        "music" => {
            if flag(verb, args)? {
                SequenceCommand::EnableMusicTrigger
            } else {
                SequenceCommand::DisableMusicTrigger
            }
        }
        "flood" => match args.first().map(String::as_str) {
            None => return Err(ConsoleError::MissingArgs(verb.to_string())),
            Some("off") | Some("0") => SequenceCommand::StopFlood,
            Some("on") | Some("1") => SequenceCommand::StartFlood(Color::WHITE),
            Some(_) => SequenceCommand::StartFlood(colors(verb, &args[..1])?[0]),
        },
        "static" => SequenceCommand::SetStatic(colors(verb, args)?),
        "colors" | "color" => {
            let colors = colors(verb, args)?;
            if colors.is_empty() {
                return Err(ConsoleError::MissingArgs(verb.to_string()));
            }
            SequenceCommand::UpdateColors(colors)
        }
        "bounce" => SequenceCommand::UpdateBounce(flag(verb, args)?),
        "invert" => SequenceCommand::UpdateInvert(flag(verb, args)?),
        "strobe" => SequenceCommand::UpdateStrobe(flag(verb, args)?),
        "strobe_speed" => SequenceCommand::UpdateStrobeSpeed(byte(verb, args)?),
        "scanner_size" => SequenceCommand::UpdateScannerSize(byte(verb, args)?),
        "coordinates" => SequenceCommand::UpdateCoordinates(count(verb, args)?),
        "scanner_chase" => SequenceCommand::UpdateScannerChase(flag(verb, args)?),
        "gobo" => SequenceCommand::UpdateGobo(byte(verb, args)?),
        "auto_color" => SequenceCommand::UpdateAutoColor(flag(verb, args)?),
        "auto_pattern" => SequenceCommand::UpdateAutoPattern(flag(verb, args)?),
        "switch" => {
            if args.len() < 2 {
                return Err(ConsoleError::MissingArgs(verb.to_string()));
            }
            SequenceCommand::OverrideSwitch {
                switch: number(verb, &args[..1])?,
                state: number(verb, &args[1..])?,
            }
        }
        // `fixture <i> [on|off] [invert] [reverse]` sets the whole state.
        "fixture" => {
            let index: usize = number(verb, args)?;
            let mut enabled = true;
            let mut rgb_invert = false;
            let mut pattern_reverse = false;
            for arg in &args[1..] {
                match arg.as_str() {
                    "invert" => rgb_invert = true,
                    "reverse" => pattern_reverse = true,
                    other => enabled = switch(verb, other)?,
                }
            }
            SequenceCommand::UpdateFixtureState {
                index,
                enabled,
                rgb_invert,
                pattern_reverse,
            }
        }
        _ => return Err(ConsoleError::UnknownCommand(verb.to_string())),
    };
    Ok(cmd)
}
