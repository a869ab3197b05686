//! Building blocks for module-side processing
//!
//! Modules read the [`ParameterChannel`] once per block and smooth every
//! value per sample, so parameter jumps from the control surface never
//! produce clicks.

use std::f32::consts::TAU;

use super::params::ParameterChannel;

/// Per-sample smoothing factor used by the reference module
pub const SMOOTHING_COEFFICIENT: f32 = 0.01;

/// One-pole exponential smoother
#[derive(Debug, Clone, Copy)]
pub struct Smoothed {
    current: f32,
    coefficient: f32,
}

impl Smoothed {
    pub fn new(initial: f32, coefficient: f32) -> Self {
        Self {
            current: initial,
            coefficient: coefficient.clamp(0.0, 1.0),
        }
    }

    /// Move one step toward `target` and return the new value
    #[inline]
    pub fn next(&mut self, target: f32) -> f32 {
        self.current += self.coefficient * (target - self.current);
        self.current
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }
}

/// Phase accumulator kept in [0, 2π)
#[derive(Debug, Clone, Copy, Default)]
pub struct Phase {
    radians: f32,
}

impl Phase {
    pub fn new(radians: f32) -> Self {
        Self {
            radians: radians.rem_euclid(TAU),
        }
    }

    #[inline]
    pub fn radians(&self) -> f32 {
        self.radians
    }

    /// Advance by one sample of `frequency` at `sample_rate`
    #[inline]
    pub fn advance(&mut self, frequency: f32, sample_rate: f32) {
        self.radians += TAU * frequency / sample_rate;
        if !(0.0..TAU).contains(&self.radians) {
            // Steps larger than a full turn happen when the frequency is
            // above the sample rate
            self.radians = self.radians.rem_euclid(TAU);
            if self.radians >= TAU {
                self.radians = 0.0;
            }
        }
    }
}

/// Smoothed sine oscillator driven by a [`ParameterChannel`]
#[derive(Debug, Clone)]
pub struct SineVoice {
    phase: Phase,
    frequency: Smoothed,
    gain: Smoothed,
}

impl SineVoice {
    /// Start at the channel's current values so a fresh instance does not glide
    pub fn new(params: &ParameterChannel) -> Self {
        Self {
            phase: Phase::default(),
            frequency: Smoothed::new(params.frequency(), SMOOTHING_COEFFICIENT),
            gain: Smoothed::new(params.gain(), SMOOTHING_COEFFICIENT),
        }
    }

    pub fn phase(&self) -> f32 {
        self.phase.radians()
    }

    /// Fill `out` with one block of audio
    pub fn render(&mut self, params: &ParameterChannel, out: &mut [f32]) {
        let target_frequency = params.frequency();
        let target_gain = params.gain();
        let bypass = params.bypass();
        let sample_rate = params.sample_rate().max(1) as f32;

        for sample in out.iter_mut() {
            let frequency = self.frequency.next(target_frequency);
            let gain = self.gain.next(target_gain);

            *sample = if bypass {
                0.0
            } else {
                gain * self.phase.radians().sin()
            };

            self.phase.advance(frequency, sample_rate);
        }
    }
}
