pub mod build;
pub mod control;
pub mod export;
pub mod logging;
pub mod reload;
