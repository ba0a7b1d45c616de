//! CLI command implementations for herakles-host-telemetry.
//!
//! - `check`: System validation
//! - `config`: Configuration file generation
//! - `test`: Foreground sampling run

pub mod check;
pub mod config;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use test::command_test;
