//! Command-line host for the meshmate assistant core.
//!
//! The binary is a thin composition root: it resolves the config directory,
//! opens the file preference store, brings the core up with an in-memory
//! scene as the script host, dispatches one command and shuts down.

#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(unused_crate_dependencies))]

pub mod commands;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod paths;
pub mod preferences;

use std::sync::Arc;

use meshmate::{CoreEvent, CoreEventEmitter, InitOptions, MemoryScene};
use tracing_subscriber::EnvFilter;

pub use commands::Commands;
pub use error::{CliError, exit_code_for};
pub use parser::Cli;
pub use preferences::FilePreferenceStore;

/// Forwards core events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmitter;

impl CoreEventEmitter for LogEmitter {
    fn emit(&self, event: CoreEvent) {
        tracing::debug!(?event, "Core event");
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `--verbose`.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run one command end to end.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    let config_dir = paths::resolve_config_dir(cli.config_dir.as_deref())?;
    let store = FilePreferenceStore::open(paths::preferences_path(&config_dir))?;
    tracing::debug!(path = %store.path().display(), "Using preferences");

    let handle = meshmate::init(
        InitOptions::new(Arc::new(store))
            .with_host(Arc::new(MemoryScene::new()))
            .with_emitter(Arc::new(LogEmitter)),
    )?;

    let result = handlers::execute(&handle, cli.command);
    handle.shutdown();
    result
}
