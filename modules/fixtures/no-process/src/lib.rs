//! Exports `createPlugin` and `destroyPlugin` but no `processPlugin`.
//! The host must refuse to load it.

use std::ffi::c_void;

/// # Safety
/// Called by the host loader only.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn createPlugin(_params: *const c_void) -> *mut c_void {
    Box::into_raw(Box::new(0u32)) as *mut c_void
}

/// # Safety
/// `state` must come from `createPlugin`.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn destroyPlugin(state: *mut c_void) {
    if !state.is_null() {
        drop(Box::from_raw(state as *mut u32));
    }
}
