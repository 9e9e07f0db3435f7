//! Pattern-driven DMX playout for chase lighting.
//!
//! Sequences of RGB pars or scanners play compiled patterns: the
//! [`pattern`] library lays out steps, [`fade`] builds the envelopes,
//! [`compiler`] turns both into per-tick positions, a [`scheduler`] thread
//! walks them and one [`fixture`] actor per lamp renders its DMX channels.

pub mod compiler;
pub mod config;
pub mod console;
pub mod dmx_output;
pub mod dmx_types;
pub mod fade;
pub mod fixture;
pub mod osc;
pub mod pattern;
pub mod scheduler;
pub mod sequence;
pub mod show;
