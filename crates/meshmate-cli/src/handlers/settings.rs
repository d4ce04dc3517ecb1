//! `settings show|set`.

use anyhow::Result;
use meshmate::{CoreHandle, Settings};
use meshmate_core::settings::parse_setting;

use crate::commands::SettingsCommand;
use crate::error::CliError;

pub fn execute(handle: &CoreHandle, command: SettingsCommand) -> Result<()> {
    match command {
        SettingsCommand::Show => {
            println!("Current settings:");
            for (key, value) in describe(&handle.settings()) {
                println!("  {key:<24} {value}");
            }
            Ok(())
        }
        SettingsCommand::Set { key, value } => {
            let update =
                parse_setting(&key, &value).map_err(|e| CliError::Arguments(e.to_string()))?;
            let settings = handle.update_settings(&update)?;
            let shown = describe(&settings)
                .into_iter()
                .find(|(k, _)| *k == key)
                .map_or(value, |(_, v)| v);
            println!("✓ {key} = {shown}");
            Ok(())
        }
    }
}

/// Effective value of every setting, in display order.
pub fn describe(settings: &Settings) -> Vec<(&'static str, String)> {
    vec![
        ("mcp_enabled", settings.effective_mcp_enabled().to_string()),
        ("mcp_auto_connect", settings.effective_auto_connect().to_string()),
        (
            "tool_block_threshold",
            settings.effective_tool_block_threshold().to_string(),
        ),
        (
            "tool_confirm_threshold",
            settings
                .effective_tool_confirm_threshold()
                .map_or_else(|| "off".to_string(), |s| s.to_string()),
        ),
        (
            "script_block_threshold",
            settings.effective_script_block_threshold().to_string(),
        ),
        (
            "code_execution_enabled",
            settings.effective_code_execution().to_string(),
        ),
        (
            "sandbox_max_seconds",
            settings.effective_sandbox_max_seconds().to_string(),
        ),
        (
            "sandbox_max_operations",
            settings.effective_sandbox_max_operations().to_string(),
        ),
        (
            "max_tool_iterations",
            settings.effective_max_tool_iterations().to_string(),
        ),
        (
            "resource_cache_ttl_secs",
            settings
                .resource_cache_ttl_secs
                .map_or_else(|| "none".to_string(), |ttl| ttl.to_string()),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_defaults() {
        let described = describe(&Settings::with_defaults());
        let get = |key: &str| {
            described
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(described.len(), 10);
        assert_eq!(get("tool_block_threshold"), "high");
        assert_eq!(get("tool_confirm_threshold"), "medium");
        assert_eq!(get("max_tool_iterations"), "10");
        assert_eq!(get("resource_cache_ttl_secs"), "none");
    }
}
