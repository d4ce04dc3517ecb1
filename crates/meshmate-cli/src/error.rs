//! CLI-specific error types and mappings.
//!
//! Maps core errors and non-successful execution outcomes to exit codes.

use meshmate::InitError;
use meshmate_core::{CoreError, ErrorCategory, ExecutionOutcome};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Core(String),

    #[error("Invalid arguments: {0}")]
    Arguments(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A server could not be reached or timed out.
    #[error("{0}")]
    Unavailable(String),

    /// A tool call or script ended without success.
    #[error("Execution {outcome}")]
    Execution { outcome: ExecutionOutcome },
}

impl CliError {
    /// Exit codes follow sysexits.h where one fits.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Core(_) => 1,
            Self::Arguments(_) => 2,
            Self::Unavailable(_) => 69, // EX_UNAVAILABLE
            Self::Io(_) => 74,          // EX_IOERR
            Self::Config(_) => 78,      // EX_CONFIG
            Self::Execution {
                outcome: ExecutionOutcome::Blocked,
            } => 77, // EX_NOPERM
            Self::Execution {
                outcome: ExecutionOutcome::Timeout,
            } => 75, // EX_TEMPFAIL
            Self::Execution { .. } => 1,
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err.category() {
            ErrorCategory::Configuration => Self::Config(message),
            ErrorCategory::Lookup | ErrorCategory::Validation => Self::Arguments(message),
            ErrorCategory::Connection | ErrorCategory::Timeout => Self::Unavailable(message),
            ErrorCategory::Storage => Self::Io(message),
            ErrorCategory::Policy | ErrorCategory::Execution => Self::Core(message),
        }
    }
}

impl From<InitError> for CliError {
    fn from(err: InitError) -> Self {
        match err {
            InitError::Runtime(e) => Self::Core(e.to_string()),
            InitError::Core(e) => e.into(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Exit code for an error surfaced at the binary edge.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return cli.exit_code();
    }
    if let Some(core) = err.downcast_ref::<CoreError>() {
        return CliError::from(core.clone()).exit_code();
    }
    if let Some(init) = err.downcast_ref::<InitError>() {
        return match init {
            InitError::Core(core) => CliError::from(core.clone()).exit_code(),
            InitError::Runtime(_) => 1,
        };
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return 74;
    }
    1
}
