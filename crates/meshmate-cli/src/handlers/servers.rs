//! `servers` subcommands.

use std::fs;

use anyhow::{Context, Result};
use meshmate::{CoreHandle, ServerConfig};

use crate::commands::ServersCommand;
use crate::error::CliError;

pub fn execute(handle: &CoreHandle, command: ServersCommand) -> Result<()> {
    match command {
        ServersCommand::List => list(handle),
        ServersCommand::Add {
            name,
            command,
            args,
            env,
            cwd,
            description,
            timeout,
            disabled,
        } => {
            let mut config = ServerConfig::new(name, command).with_args(args);
            for pair in &env {
                let (key, value) = parse_env(pair)?;
                config = config.with_env(key, value);
            }
            config.cwd = cwd;
            if let Some(description) = description {
                config = config.with_description(description);
            }
            if let Some(timeout) = timeout {
                config = config.with_timeout(timeout);
            }
            config = config.with_enabled(!disabled);

            let name = config.name.clone();
            handle.upsert_server(config)?;
            println!("✓ Saved server '{name}'");
            Ok(())
        }
        ServersCommand::Remove { name } => {
            handle.remove_server(&name)?;
            println!("✓ Removed server '{name}'");
            Ok(())
        }
        ServersCommand::Import { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let report = handle.import_servers(&text)?;
            println!("✓ Imported {} server(s)", report.imported.len());
            for name in &report.imported {
                println!("  {name}");
            }
            for issue in &report.issues {
                println!("✗ {}: {}", issue.name, issue.message);
            }
            Ok(())
        }
        ServersCommand::Export => {
            let document = serde_json::to_string_pretty(&handle.export_servers())?;
            println!("{document}");
            Ok(())
        }
    }
}

fn list(handle: &CoreHandle) -> Result<()> {
    let servers = handle.list_servers();
    if servers.is_empty() {
        println!("No servers configured. Add one with `meshmate servers add`.");
        return Ok(());
    }

    println!("{:<24} {:<8} COMMAND", "NAME", "ENABLED");
    for server in servers {
        let config = &server.config;
        let enabled = if config.enabled { "yes" } else { "no" };
        let command_line = std::iter::once(config.command.as_str())
            .chain(config.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{:<24} {:<8} {command_line}", config.name, enabled);
        if let Some(description) = &config.description {
            println!("{:<24} {description}", "");
        }
    }
    Ok(())
}

/// Split `KEY=VALUE`.
pub fn parse_env(pair: &str) -> Result<(String, String), CliError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(CliError::Arguments(format!(
            "environment entry '{pair}' must look like KEY=VALUE"
        ))),
    }
}
