//! Reference module: a smoothed sine oscillator
//!
//! Edit this file while the host is running. On save the host rebuilds the
//! crate and swaps the new library in without stopping the audio.

use std::ffi::c_void;

use hotdsp_lib::audio::dsp::{Phase, Smoothed, SMOOTHING_COEFFICIENT};
use hotdsp_lib::audio::params::ParameterChannel;

struct Sine {
    params: *const ParameterChannel,
    phase: Phase,
    frequency: Smoothed,
    gain: Smoothed,
}

impl Sine {
    fn new(params: &ParameterChannel) -> Self {
        Self {
            params,
            phase: Phase::default(),
            frequency: Smoothed::new(params.frequency(), SMOOTHING_COEFFICIENT),
            gain: Smoothed::new(params.gain(), SMOOTHING_COEFFICIENT),
        }
    }

    // The same algorithm as `SineVoice::render`, written out here because
    // this is the body meant to be edited live
    fn process(&mut self, out: &mut [f32]) {
        // Safety: the host keeps the channel alive for the instance's lifetime
        let params = unsafe { &*self.params };
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

/// # Safety
/// `params` must be null or outlive the returned instance.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn createPlugin(params: *const ParameterChannel) -> *mut c_void {
    match params.as_ref() {
        Some(channel) => Box::into_raw(Box::new(Sine::new(channel))) as *mut c_void,
        None => std::ptr::null_mut(),
    }
}

/// # Safety
/// `state` must come from `createPlugin` and is invalid afterwards.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn destroyPlugin(state: *mut c_void) {
    if !state.is_null() {
        drop(Box::from_raw(state as *mut Sine));
    }
}

/// # Safety
/// `state` must come from `createPlugin`; `out` must hold `frames` samples.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn processPlugin(state: *mut c_void, out: *mut f32, frames: u32) {
    if state.is_null() || out.is_null() {
        return;
    }
    let sine = &mut *(state as *mut Sine);
    sine.process(std::slice::from_raw_parts_mut(out, frames as usize));
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotdsp_lib::audio::dsp::SineVoice;
    use hotdsp_lib::audio::params::ParamDefaults;

    #[test]
    fn test_matches_builtin_voice() {
        let params = ParameterChannel::new(
            ParamDefaults {
                frequency: 330.0,
                gain: 0.4,
                bypass: false,
            },
            44_100,
        );
        let mut sine = Sine::new(&params);
        let mut voice = SineVoice::new(&params);

        let mut ours = vec![0.0f32; 512];
        let mut builtin = vec![0.0f32; 512];
        for (frequency, gain) in [(330.0, 0.4), (1_200.0, 0.9), (90.0, 0.1)] {
            params.set_frequency(frequency);
            params.set_gain(gain);
            sine.process(&mut ours);
            voice.render(&params, &mut builtin);
            assert_eq!(ours, builtin);
        }
    }

    #[test]
    fn test_entry_points() {
        let params = ParameterChannel::new(
            ParamDefaults {
                frequency: 440.0,
                gain: 1.0,
                bypass: false,
            },
            48_000,
        );

        unsafe {
            assert!(createPlugin(std::ptr::null()).is_null());

            let state = createPlugin(&params);
            assert!(!state.is_null());

            let mut out = vec![0.0f32; 48_000];
            processPlugin(state, out.as_mut_ptr(), out.len() as u32);
            let rising = out.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
            assert!((439..=441).contains(&rising), "{} crossings", rising);

            params.set_bypass(true);
            processPlugin(state, out.as_mut_ptr(), 256);
            assert!(out[..256].iter().all(|&s| s == 0.0));

            destroyPlugin(state);
        }
    }
}
