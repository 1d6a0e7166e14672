pub mod aggregate;
pub mod capability;
pub mod config;
pub mod error;
pub mod stream;
pub mod telemetry;
pub mod tool;

pub use error::{Error, Result};
