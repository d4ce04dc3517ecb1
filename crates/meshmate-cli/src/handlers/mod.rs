//! Command handlers.
//!
//! Each handler works against the blocking [`CoreHandle`]; the binary owns
//! init and shutdown around the dispatch.

pub mod scripts;
pub mod servers;
pub mod settings;
pub mod tools;

use anyhow::Result;
use meshmate::CoreHandle;

use crate::commands::Commands;

/// Dispatch `command` to its handler.
pub fn execute(handle: &CoreHandle, command: Commands) -> Result<()> {
    match command {
        Commands::Servers { command } => servers::execute(handle, command),
        Commands::Connect { name } => tools::connect(handle, &name),
        Commands::Tools => tools::list(handle),
        Commands::Call { tool, args, confirm } => tools::call(handle, &tool, &args, confirm),
        Commands::Check { source } => scripts::check(handle, &source),
        Commands::Run { source } => scripts::run(handle, &source),
        Commands::Settings { command } => settings::execute(handle, command),
    }
}
