//! Built-in sine module
//!
//! The same algorithm the `sine-plugin` crate ships as a native module,
//! exposed through in-process entry points. Used as the fallback module and
//! by tests that need a real instance without a compiled library.

use std::ffi::c_void;

use super::abi::EntryPoints;
use crate::audio::dsp::SineVoice;
use crate::audio::params::ParameterChannel;

struct SineState {
    voice: SineVoice,
    params: *const ParameterChannel,
}

/// # Safety
/// `params` must be null or point to a channel that outlives the instance.
pub unsafe extern "C" fn create(params: *const ParameterChannel) -> *mut c_void {
    let Some(channel) = params.as_ref() else {
        return std::ptr::null_mut();
    };
    let state = SineState {
        voice: SineVoice::new(channel),
        params,
    };
    Box::into_raw(Box::new(state)) as *mut c_void
}

/// # Safety
/// `state` must come from [`create`] and not be used afterwards.
pub unsafe extern "C" fn destroy(state: *mut c_void) {
    if !state.is_null() {
        drop(Box::from_raw(state as *mut SineState));
    }
}

/// # Safety
/// `state` must come from [`create`]; `out` must be valid for `frames` writes.
pub unsafe extern "C" fn process(state: *mut c_void, out: *mut f32, frames: u32) {
    if state.is_null() || out.is_null() {
        return;
    }
    let state = &mut *(state as *mut SineState);
    let out = std::slice::from_raw_parts_mut(out, frames as usize);
    state.voice.render(&*state.params, out);
}

pub fn entry_points() -> EntryPoints {
    EntryPoints {
        create,
        destroy,
        process: Some(process),
    }
}
