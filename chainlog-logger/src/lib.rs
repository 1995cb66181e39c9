//! Process-wide `tracing` setup shared by the chainlog binaries.
pub mod logging;

pub use logging::{init, LogConfig, LogFormat, LogOutput};
