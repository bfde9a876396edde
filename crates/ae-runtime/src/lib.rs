#[macro_use]
mod log_macros;

pub mod error;
pub mod replay;
pub mod rule_task;
pub mod service;
pub mod tracing_init;
