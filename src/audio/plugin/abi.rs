//! Module entry points
//!
//! A module is a native library exporting three C-ABI functions:
//!
//! ```text
//! createPlugin(params: *const ParameterChannel) -> *mut c_void
//! destroyPlugin(state: *mut c_void)
//! processPlugin(state: *mut c_void, out: *mut f32, frames: u32)
//! ```
//!
//! `processPlugin` writes `frames` mono samples in [-1, 1].

use std::ffi::c_void;

use crate::audio::params::ParameterChannel;

pub const CREATE_SYMBOL: &str = "createPlugin";
pub const DESTROY_SYMBOL: &str = "destroyPlugin";
pub const PROCESS_SYMBOL: &str = "processPlugin";

pub type CreateFn = unsafe extern "C" fn(params: *const ParameterChannel) -> *mut c_void;
pub type DestroyFn = unsafe extern "C" fn(state: *mut c_void);
pub type ProcessFn = unsafe extern "C" fn(state: *mut c_void, out: *mut f32, frames: u32);

/// The capability set of a module
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub create: CreateFn,
    pub destroy: DestroyFn,
    /// Resolved modules always have one; `None` renders silence
    pub process: Option<ProcessFn>,
}

/// Null-terminated symbol name for `libloading::Library::get`
pub(crate) fn symbol_bytes(name: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(name.len() + 1);
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_bytes_terminated() {
        assert_eq!(symbol_bytes(PROCESS_SYMBOL), b"processPlugin\0".to_vec());
    }
}
