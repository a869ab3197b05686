//! Control parameters shared between the control surface and the loaded module
//!
//! Every field is its own atomic. Writers (the control surface) and the
//! reader (the module's process call) never coordinate beyond that, so a
//! reader can observe a new frequency together with an old gain. Modules
//! smooth every value they read, which hides those transitions.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Lowest frequency the control surface may request (Hz)
pub const MIN_FREQUENCY: f32 = 20.0;
/// Highest frequency the control surface may request (Hz)
pub const MAX_FREQUENCY: f32 = 20_000.0;

/// Helper to store f32 in AtomicU32
#[inline]
fn f32_to_u32(f: f32) -> u32 {
    f.to_bits()
}

/// Helper to load f32 from AtomicU32
#[inline]
fn u32_to_f32(u: u32) -> f32 {
    f32::from_bits(u)
}

/// Initial parameter values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamDefaults {
    pub frequency: f32,
    pub gain: f32,
    pub bypass: bool,
}

impl Default for ParamDefaults {
    fn default() -> Self {
        Self {
            frequency: 220.0,
            gain: 0.1,
            bypass: false,
        }
    }
}

/// Plain copy of the channel, for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSnapshot {
    pub frequency: f32,
    pub gain: f32,
    pub bypass: bool,
    pub sample_rate: u32,
}

/// Fixed-layout parameter block handed to modules by pointer.
///
/// The layout is part of the module ABI: modules receive a
/// `*const ParameterChannel` from `createPlugin` and read it from their
/// process call.
#[repr(C)]
#[derive(Debug)]
pub struct ParameterChannel {
    frequency: AtomicU32,
    gain: AtomicU32,
    bypass: AtomicBool,
    sample_rate: AtomicU32,
}

impl ParameterChannel {
    pub fn new(defaults: ParamDefaults, sample_rate: u32) -> Self {
        let channel = Self {
            frequency: AtomicU32::new(f32_to_u32(ParamDefaults::default().frequency)),
            gain: AtomicU32::new(f32_to_u32(ParamDefaults::default().gain)),
            bypass: AtomicBool::new(defaults.bypass),
            sample_rate: AtomicU32::new(sample_rate.max(1)),
        };
        channel.set_frequency(defaults.frequency);
        channel.set_gain(defaults.gain);
        channel
    }

    /// Oscillator frequency in Hz
    #[inline]
    pub fn frequency(&self) -> f32 {
        u32_to_f32(self.frequency.load(Ordering::Relaxed))
    }

    /// Set the frequency, clamped to the audible range. Non-finite values are ignored.
    pub fn set_frequency(&self, hz: f32) {
        if !hz.is_finite() {
            return;
        }
        let hz = hz.clamp(MIN_FREQUENCY, MAX_FREQUENCY);
        self.frequency.store(f32_to_u32(hz), Ordering::Relaxed);
    }

    /// Linear output gain (0.0 - 1.0)
    #[inline]
    pub fn gain(&self) -> f32 {
        u32_to_f32(self.gain.load(Ordering::Relaxed))
    }

    /// Set the gain, clamped to 0.0 - 1.0. Non-finite values are ignored.
    pub fn set_gain(&self, gain: f32) {
        if !gain.is_finite() {
            return;
        }
        self.gain
            .store(f32_to_u32(gain.clamp(0.0, 1.0)), Ordering::Relaxed);
    }

    #[inline]
    pub fn bypass(&self) -> bool {
        self.bypass.load(Ordering::Relaxed)
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.store(bypass, Ordering::Relaxed);
    }

    /// Flip bypass and return the new value
    pub fn toggle_bypass(&self) -> bool {
        !self.bypass.fetch_xor(true, Ordering::Relaxed)
    }

    /// Stream sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Set by the host when the output stream is (re)configured
    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate.max(1), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ParamSnapshot {
        ParamSnapshot {
            frequency: self.frequency(),
            gain: self.gain(),
            bypass: self.bypass(),
            sample_rate: self.sample_rate(),
        }
    }
}

impl Default for ParameterChannel {
    fn default() -> Self {
        Self::new(ParamDefaults::default(), 48_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let params = ParameterChannel::new(
            ParamDefaults {
                frequency: 440.0,
                gain: 0.5,
                bypass: true,
            },
            44_100,
        );
        let snap = params.snapshot();
        assert_eq!(snap.frequency, 440.0);
        assert_eq!(snap.gain, 0.5);
        assert!(snap.bypass);
        assert_eq!(snap.sample_rate, 44_100);
    }

    #[test]
    fn test_setters_clamp() {
        let params = ParameterChannel::default();

        params.set_frequency(5.0);
        assert_eq!(params.frequency(), MIN_FREQUENCY);
        params.set_frequency(96_000.0);
        assert_eq!(params.frequency(), MAX_FREQUENCY);

        params.set_gain(1.5);
        assert_eq!(params.gain(), 1.0);
        params.set_gain(-0.2);
        assert_eq!(params.gain(), 0.0);
    }

    #[test]
    fn test_non_finite_ignored() {
        let params = ParameterChannel::default();
        params.set_frequency(330.0);
        params.set_gain(0.25);

        params.set_frequency(f32::NAN);
        params.set_gain(f32::INFINITY);

        assert_eq!(params.frequency(), 330.0);
        assert_eq!(params.gain(), 0.25);
    }

    #[test]
    fn test_toggle_bypass() {
        let params = ParameterChannel::default();
        assert!(!params.bypass());
        assert!(params.toggle_bypass());
        assert!(params.bypass());
        assert!(!params.toggle_bypass());
        assert!(!params.bypass());
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let params = ParameterChannel::new(ParamDefaults::default(), 0);
        assert_eq!(params.sample_rate(), 1);
        params.set_sample_rate(48_000);
        assert_eq!(params.sample_rate(), 48_000);
    }
}
