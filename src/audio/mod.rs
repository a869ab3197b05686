//! Audio side of the host
//!
//! - Parameter block shared with modules
//! - DSP helpers used by the reference module
//! - History ring of everything rendered
//! - Real-time render entry point and the cpal output stream
//! - Native module hosting with hot reload

#[cfg(feature = "device")]
pub mod device;
pub mod dsp;
pub mod engine;
pub mod history;
pub mod params;
pub mod plugin;
