//! Fade-curve generator.
//!
//! A lit step is `2 * (coordinates - 1) + fade` ticks long, not
//! `2 * coordinates + fade`: the zero that starts `up` and the zero that
//! ends `down` are dropped, so a lit cell never has a dark sample and
//! neighbouring steps do not stack two dark ticks between them.

use thiserror::Error;
use tween::Tweener;

#[derive(Error, Debug, PartialEq)]
pub enum FadeError {
    #[error("A fade needs at least 2 coordinates, got {0}")]
    TooFewCoordinates(usize),
    #[error("Fade length must be at least 1")]
    ZeroFade,
}

/// Fade-up and fade-down envelopes of one lit step, plus the plateau
/// that sits between them.
#[derive(Clone, PartialEq, Debug)]
pub struct FadeCurves {
    /// Cosine ease from 0 to `size`.
    pub up: Vec<u8>,
    /// Cosine ease from `size` to 0, the mirror of `up`.
    pub down: Vec<u8>,
    /// `fade` samples held at `size`.
    pub on_hold: Vec<u8>,
    pub size: u8,
}

impl FadeCurves {
    /// Samples of one lit step: `up` without its leading zero, the hold,
    /// then `down` without its trailing zero. Never below 1 unless `size` is 0.
    pub fn envelope(&self) -> Vec<u8> {
        let floor = self.size.min(1);
        self.up[1..]
            .iter()
            .chain(self.on_hold.iter())
            .chain(self.down[..self.down.len() - 1].iter())
            .map(|v| (*v).max(floor))
            .collect()
    }

    /// Length of [`FadeCurves::envelope`].
    pub fn unit_len(&self) -> usize {
        2 * (self.up.len() - 1) + self.on_hold.len()
    }

    /// The rising part of the envelope, floored like the envelope.
    pub fn rise(&self) -> Vec<u8> {
        let floor = self.size.min(1);
        self.up[1..].iter().map(|v| (*v).max(floor)).collect()
    }

    /// The falling part of the envelope, floored like the envelope.
    pub fn fall(&self) -> Vec<u8> {
        let floor = self.size.min(1);
        self.down[..self.down.len() - 1]
            .iter()
            .map(|v| (*v).max(floor))
            .collect()
    }
}

/// Builds the envelopes for a step of `coordinates` ramp samples, a
/// plateau of `fade` samples and a peak of `size`.
pub fn fade_curves(coordinates: usize, fade: usize, size: u8) -> Result<FadeCurves, FadeError> {
    if coordinates < 2 {
        return Err(FadeError::TooFewCoordinates(coordinates));
    }
    if fade == 0 {
        return Err(FadeError::ZeroFade);
    }

    let last = coordinates - 1;
    let mut tween = Tweener::sine_in_out(0.0f32, size as f32, last as f32);
    let mut up: Vec<u8> = (0..coordinates)
        .map(|i| tween.move_to(i as f32).round().clamp(0.0, size as f32) as u8)
        .collect();
    up[0] = 0;
    up[last] = size;

    let down = up.iter().rev().copied().collect();

    Ok(FadeCurves {
        up,
        down,
        on_hold: vec![size; fade],
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_are_monotone_with_fixed_endpoints() {
        for coordinates in [2, 3, 10, 33, 100] {
            for size in [0u8, 1, 64, 255] {
                let c = fade_curves(coordinates, 1, size).unwrap();
                assert_eq!(c.up.len(), coordinates);
                assert_eq!(c.down.len(), coordinates);
                assert!(c.up.windows(2).all(|w| w[0] <= w[1]));
                assert!(c.down.windows(2).all(|w| w[0] >= w[1]));
                assert_eq!((c.up[0], c.up[coordinates - 1]), (0, size));
                assert_eq!((c.down[0], c.down[coordinates - 1]), (size, 0));
            }
        }
    }

    #[test]
    fn curve_is_a_cosine_ease() {
        let c = fade_curves(11, 1, 200).unwrap();
        // Halfway through a sine in-out ease sits at half the size.
        assert_eq!(c.up[5], 100);
        // Slow start, slow finish.
        assert!(c.up[1] < 20);
        assert!(c.up[9] > 180);
    }

    #[test]
    fn curves_are_reproducible() {
        assert_eq!(fade_curves(17, 3, 255), fade_curves(17, 3, 255));
    }

    #[test]
    fn hold_and_envelope_lengths() {
        let c = fade_curves(10, 4, 255).unwrap();
        assert_eq!(c.on_hold, vec![255; 4]);
        assert_eq!(c.unit_len(), 22);
        let env = c.envelope();
        assert_eq!(env.len(), c.unit_len());
        assert!(env.iter().all(|v| *v >= 1));
        assert_eq!(env[8..13], [255; 5]);
        let reversed: Vec<u8> = env.iter().rev().copied().collect();
        assert_eq!(env, reversed);
    }

    #[test]
    fn degenerate_inputs_are_rejected() {
        assert_eq!(fade_curves(1, 1, 255), Err(FadeError::TooFewCoordinates(1)));
        assert_eq!(fade_curves(0, 1, 255), Err(FadeError::TooFewCoordinates(0)));
        assert_eq!(fade_curves(10, 0, 255), Err(FadeError::ZeroFade));
    }
}
