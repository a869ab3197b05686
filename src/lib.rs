pub mod audio;
pub mod commands;
pub mod config;

#[cfg(feature = "device")]
mod app;

#[cfg(feature = "device")]
pub use app::{run, Cli};
