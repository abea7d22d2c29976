//! Runtime glue: configuration, run tracking and error taxonomy, telemetry,
//! and the runner that drives registered triggers.

pub mod config;
pub mod error;
pub(crate) mod panic;
pub mod run;
pub mod runner;
pub mod telemetry;
