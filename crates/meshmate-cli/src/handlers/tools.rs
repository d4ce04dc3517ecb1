//! `connect`, `tools` and `call`.

use anyhow::Result;
use meshmate::{CoreHandle, ExecutionOutcome, ToolCallRequest};
use serde_json::Value;

use crate::error::CliError;

pub fn connect(handle: &CoreHandle, name: &str) -> Result<()> {
    let state = handle.connect(name)?;
    println!("✓ {name}: {state}");

    let tools = handle.list_tools();
    let owned: Vec<_> = tools.iter().filter(|t| t.server == name).collect();
    println!("  {} tool(s)", owned.len());
    for tool in owned {
        println!("  - {}", tool.qualified_name());
    }
    let resources = handle
        .list_resources()
        .into_iter()
        .filter(|r| r.server == name)
        .count();
    println!("  {resources} resource(s)");
    Ok(())
}

pub fn list(handle: &CoreHandle) -> Result<()> {
    let report = handle.connect_enabled()?;
    for (name, error) in &report.failed {
        eprintln!("✗ {name}: {error}");
    }

    let tools = handle.list_tools();
    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }
    for tool in tools {
        let description = tool.description.as_deref().unwrap_or("");
        println!("{:<40} {description}", tool.qualified_name());
    }
    Ok(())
}

pub fn call(handle: &CoreHandle, tool: &str, args: &str, confirm: bool) -> Result<()> {
    let arguments = parse_arguments(args)?;
    let server = tool
        .split_once('.')
        .map(|(server, _)| server)
        .ok_or_else(|| {
            CliError::Arguments(format!("'{tool}' is not a qualified name (server.tool)"))
        })?;
    handle.connect(server)?;

    let mut request = ToolCallRequest::new(tool).with_arguments(arguments);
    if confirm {
        request = request.confirmed();
    }
    let result = handle.invoke(&request)?;
    print!("{result}");
    if result.requires_confirmation {
        println!("Re-run with --confirm to proceed.");
    }

    match result.outcome {
        ExecutionOutcome::Success => Ok(()),
        outcome => Err(CliError::Execution { outcome }.into()),
    }
}

/// Parse `--args`; only a JSON object is accepted.
pub fn parse_arguments(args: &str) -> Result<Value, CliError> {
    let value: Value = serde_json::from_str(args)
        .map_err(|e| CliError::Arguments(format!("--args is not valid JSON: {e}")))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::Arguments("--args must be a JSON object".into()))
    }
}
