//! Binary-side orchestration: tracing setup, the run pipeline, progress and exit codes.

pub(crate) mod exit_handler;
pub(crate) mod progress_manager;
pub(crate) mod runtime;
pub(crate) mod terminal;
