//! Use cases: AOI building and command dispatch/handling.

pub mod aoi;
pub mod commands;

pub use aoi::BuildAoi;
pub use commands::{CommandResult, Dispatcher};
