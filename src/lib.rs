//! Sleep sensor link library
//! Device link and telemetry pipeline for wrist-worn health sensors.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod state;
pub mod utils;

pub use crate::error::{ConnectError, IoError, LinkError};
