//! Native module hosting with hot reload
//!
//! A module is a shared library exporting `createPlugin`, `destroyPlugin`
//! and `processPlugin`. [`ModuleHost`] loads it into a [`ModuleHandle`] and
//! publishes it through the [`LiveModule`] slot the audio thread reads.

pub mod abi;
pub mod host;
pub mod module;
pub mod sine;
pub mod slot;

pub use abi::EntryPoints;
pub use host::{cleanup_scratch_dir, ModuleHost, ModuleStatus, ShadowCopy};
pub use module::{LoadError, ModuleHandle};
pub use slot::LiveModule;
