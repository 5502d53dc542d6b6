//! CLI entry point for the manga downloader.

use std::process::ExitCode;

mod app;
mod cli;

/// Process outcome, mapped to the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every page was saved or already present.
    Success,
    /// Some pages failed.
    Partial,
    /// Bad input, nothing downloaded, or interrupted.
    Failure,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_downloader().await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}
