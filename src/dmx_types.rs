//! DMX Types and Data Structures
//!
//! This module defines the core value types shared by the playout engine:
//!
//! ## Colors
//! - [`Color`] - RGB(WA/UV) color values, parsed from and written as `#RRGGBB`
//! - [`PALETTE`] - the fixed 8-color palette used by the color-chase patterns
//!
//! ## Channel Layouts
//! - [`ChannelType`] - Enum of the DMX channel functions the engine can drive
//! - [`ChannelDef`] - Individual channel definition within a mode
//! - [`FixtureMode`] - A specific channel configuration for a fixture
//! - [`FixtureTemplate`] - A type of fixture with its channel layouts
//! - [`FixtureTemplateLibrary`] - Built-in templates the show file can refer to by name
//!
//! ## Output
//! - [`DMXBufferValue`] - Single channel value for buffer manipulation

pub use open_dmx::DMX_CHANNELS;
use serde::{Deserialize, Serialize};

/// Color values for RGB-type fixtures.
/// Each field holds a DMX value (0-255) for that color component.
/// All-zero is the sentinel for OFF.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    /// Red channel value (0-255)
    pub r: u8,
    /// Green channel value (0-255)
    pub g: u8,
    /// Blue channel value (0-255)
    pub b: u8,
    /// White channel value (0-255) - used in RGBW fixtures
    pub w: u8,
    /// Amber channel value (0-255) - used in RGBWA fixtures
    pub amber: u8,
    /// UV (Ultraviolet) channel value (0-255) - used in RGBWAU fixtures
    pub uv: u8,
}

impl Color {
    pub const BLACK: Color = Color::from_rgb(0, 0, 0);
    pub const RED: Color = Color::from_rgb(255, 0, 0);
    pub const ORANGE: Color = Color::from_rgb(255, 111, 0);
    pub const YELLOW: Color = Color::from_rgb(255, 255, 0);
    pub const GREEN: Color = Color::from_rgb(0, 255, 0);
    pub const CYAN: Color = Color::from_rgb(0, 255, 255);
    pub const BLUE: Color = Color::from_rgb(0, 0, 255);
    pub const PURPLE: Color = Color::from_rgb(100, 0, 255);
    pub const MAGENTA: Color = Color::from_rgb(255, 0, 255);
    pub const WHITE: Color = Color::from_rgb(255, 255, 255);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self {
            r,
            g,
            b,
            w: 0,
            amber: 0,
            uv: 0,
        }
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self::from_rgb(r, g, b))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    pub fn has_color(&self) -> bool {
        self.r != 0 || self.g != 0 || self.b != 0 || self.w != 0 || self.amber != 0 || self.uv != 0
    }

    /// Scales every component by `level / 255`, rounded to nearest.
    pub fn scale(&self, level: u8) -> Self {
        let s = |c: u8| ((c as u16 * level as u16 + 127) / 255) as u8;
        Self {
            r: s(self.r),
            g: s(self.g),
            b: s(self.b),
            w: s(self.w),
            amber: s(self.amber),
            uv: s(self.uv),
        }
    }

    /// Squared RGB distance, used to pick the closest color-wheel slot.
    pub fn distance(&self, other: &Color) -> u32 {
        let d = |a: u8, b: u8| (a as i32 - b as i32).pow(2) as u32;
        d(self.r, other.r) + d(self.g, other.g) + d(self.b, other.b)
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value).ok_or_else(|| format!("invalid color '{value}', expected #RRGGBB"))
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

/// Red, orange, yellow, green, cyan, blue, purple, magenta.
pub const PALETTE: [Color; 8] = [
    Color::RED,
    Color::ORANGE,
    Color::YELLOW,
    Color::GREEN,
    Color::CYAN,
    Color::BLUE,
    Color::PURPLE,
    Color::MAGENTA,
];

/// Channel type definitions for fixtures.
/// Each variant corresponds to a specific function of a lighting fixture.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug, strum::Display, strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum ChannelType {
    /// Intensity/Dimmer - controls overall brightness (0 = off, 255 = full)
    Intensity,
    /// Red color channel for RGB mixing
    Red,
    /// Green color channel for RGB mixing
    Green,
    /// Blue color channel for RGB mixing
    Blue,
    /// White color channel for RGBW fixtures
    White,
    /// Amber color channel for RGBWA fixtures
    Amber,
    /// UV (Ultraviolet) channel
    UV,
    /// Color wheel - selects one of the scanner's predefined colors
    ColorWheel,
    /// Pan - horizontal movement (coarse)
    Pan,
    /// Pan Fine - fine horizontal adjustment
    PanFine,
    /// Tilt - vertical movement (coarse)
    Tilt,
    /// Tilt Fine - fine vertical adjustment
    TiltFine,
    /// Gobo Wheel - selects a pattern gobo
    GoboWheel,
    /// Shutter - blocks light output
    Shutter,
    /// Strobe - electronic strobe frequency control
    Strobe,
    /// Speed - movement speed for scanners
    Speed,
    /// Control - lamp on/off, reset
    Control,
}

impl ChannelType {
    pub fn is(&self, v: Self) -> bool {
        *self == v
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelType::Intensity => "Intensity",
            ChannelType::Red => "Red",
            ChannelType::Green => "Green",
            ChannelType::Blue => "Blue",
            ChannelType::White => "White",
            ChannelType::Amber => "Amber",
            ChannelType::UV => "UV",
            ChannelType::ColorWheel => "Color Wheel",
            ChannelType::Pan => "Pan",
            ChannelType::PanFine => "Pan Fine",
            ChannelType::Tilt => "Tilt",
            ChannelType::TiltFine => "Tilt Fine",
            ChannelType::GoboWheel => "Gobo Wheel",
            ChannelType::Shutter => "Shutter",
            ChannelType::Strobe => "Strobe",
            ChannelType::Speed => "Speed",
            ChannelType::Control => "Control",
        }
    }

    /// Channels zeroed by a blackout.
    pub fn carries_light(&self) -> bool {
        matches!(
            self,
            ChannelType::Intensity
                | ChannelType::Red
                | ChannelType::Green
                | ChannelType::Blue
                | ChannelType::White
                | ChannelType::Amber
                | ChannelType::UV
                | ChannelType::Shutter
        )
    }
}

/// Definition of a single channel in a fixture mode.
/// For a fixture starting at DMX channel 5 with Red at offset 1,
/// Red is actually on channel 6.
#[derive(Clone, PartialEq, Serialize, Deserialize, Debug)]
pub struct ChannelDef {
    /// The type of function this channel controls (e.g., Red, Pan, Intensity)
    pub channel_type: ChannelType,
    /// Offset from the fixture's start channel (0-based).
    pub offset: u8,
    /// Human-readable name for this channel (auto-generated from channel_type)
    pub name: String,
}

impl ChannelDef {
    pub fn new(channel_type: ChannelType, offset: u8) -> Self {
        Self {
            name: channel_type.name().to_string(),
            channel_type,
            offset,
        }
    }
}

/// A mode definition for a fixture template (e.g., 4ch, 8ch).
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct FixtureMode {
    /// Name of this mode (e.g., "4ch (Dimmer)", "3ch (RGB)")
    pub name: String,
    /// List of channel definitions in order
    pub channels: Vec<ChannelDef>,
}

impl FixtureMode {
    pub fn new(name: &str, channels: Vec<ChannelDef>) -> Self {
        Self {
            name: name.to_string(),
            channels,
        }
    }

    /// Builds a mode whose channels sit at consecutive offsets.
    pub fn from_layout(name: &str, layout: &[ChannelType]) -> Self {
        Self::new(
            name,
            layout
                .iter()
                .enumerate()
                .map(|(offset, t)| ChannelDef::new(*t, offset as u8))
                .collect(),
        )
    }

    pub fn total_channels(&self) -> usize {
        self.channels
            .iter()
            .map(|c| c.offset as usize + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn offset_of(&self, channel_type: ChannelType) -> Option<usize> {
        self.channels
            .iter()
            .find(|c| c.channel_type.is(channel_type))
            .map(|c| c.offset as usize)
    }

    pub fn has(&self, channel_type: ChannelType) -> bool {
        self.offset_of(channel_type).is_some()
    }
}

/// A fixture template defining channel layouts.
/// Represents a "type" of fixture (e.g., "Generic RGB Par") rather than
/// a specific instance.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct FixtureTemplate {
    /// Display name (e.g., "Generic RGB Par")
    pub name: String,
    /// Manufacturer name
    pub manufacturer: String,
    /// Available modes for this fixture
    pub modes: Vec<FixtureMode>,
}

impl FixtureTemplate {
    pub fn new(name: &str, manufacturer: &str) -> Self {
        Self {
            name: name.to_string(),
            manufacturer: manufacturer.to_string(),
            modes: Vec::new(),
        }
    }

    pub fn add_mode(&mut self, mode: FixtureMode) {
        self.modes.push(mode);
    }

    pub fn get_mode(&self, name: &str) -> Option<&FixtureMode> {
        self.modes.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn default_mode(&self) -> Option<&FixtureMode> {
        self.modes.first()
    }
}

/// Library of built-in fixture templates.
#[derive(Clone, Default, Serialize, Deserialize, Debug)]
pub struct FixtureTemplateLibrary {
    pub templates: Vec<FixtureTemplate>,
}

impl FixtureTemplateLibrary {
    pub fn new() -> Self {
        let mut library = Self::default();
        library.load_predefined_templates();
        library
    }

    pub fn get_template(&self, name: &str) -> Option<&FixtureTemplate> {
        self.templates
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    fn load_predefined_templates(&mut self) {
        use ChannelType::*;

        // RGB Par
        let mut rgb = FixtureTemplate::new("Generic RGB Par", "Generic");
        rgb.add_mode(FixtureMode::from_layout(
            "4ch (Dimmer)",
            &[Intensity, Red, Green, Blue],
        ));
        rgb.add_mode(FixtureMode::from_layout("3ch (RGB)", &[Red, Green, Blue]));
        self.templates.push(rgb);

        // RGBW Par
        let mut rgbw = FixtureTemplate::new("Generic RGBW Par", "Generic");
        rgbw.add_mode(FixtureMode::from_layout(
            "5ch (Dimmer)",
            &[Intensity, Red, Green, Blue, White],
        ));
        rgbw.add_mode(FixtureMode::from_layout(
            "4ch (RGBW)",
            &[Red, Green, Blue, White],
        ));
        self.templates.push(rgbw);

        // Mirror scanner
        let mut scanner = FixtureTemplate::new("Generic Scanner", "Generic");
        scanner.add_mode(FixtureMode::from_layout(
            "6ch",
            &[Pan, Tilt, ColorWheel, GoboWheel, Shutter, Intensity],
        ));
        scanner.add_mode(FixtureMode::from_layout(
            "8ch",
            &[Pan, PanFine, Tilt, TiltFine, ColorWheel, GoboWheel, Shutter, Intensity],
        ));
        self.templates.push(scanner);

        // Generic Moving Head
        let mut moving = FixtureTemplate::new("Generic Moving Head", "Generic");
        moving.add_mode(FixtureMode::from_layout(
            "12ch",
            &[
                Pan, PanFine, Tilt, TiltFine, Speed, ColorWheel, GoboWheel, Shutter, Intensity,
                Control, Red, Green,
            ],
        ));
        moving.add_mode(FixtureMode::from_layout(
            "8ch",
            &[Pan, Tilt, Speed, ColorWheel, GoboWheel, Shutter, Intensity, Control],
        ));
        self.templates.push(moving);

        // Strobe
        let mut strobe = FixtureTemplate::new("Generic Strobe", "Generic");
        strobe.add_mode(FixtureMode::from_layout("2ch", &[Strobe, Intensity]));
        self.templates.push(strobe);
    }
}

/// Represents a single DMX channel value in the buffer.
#[derive(PartialEq, Clone, Copy, Debug)]
pub struct DMXBufferValue {
    /// DMX channel number (1-based, 1-512)
    pub chan: usize,
    /// DMX value (0-255)
    pub dmx: u8,
}

impl DMXBufferValue {
    pub fn new(chan: usize, val: u8) -> Self {
        Self { chan, dmx: val }
    }
}
