//! Available commands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage tool-server configurations
    Servers {
        #[command(subcommand)]
        command: ServersCommand,
    },

    /// Connect to a server and show what it offers
    Connect {
        /// Server name
        name: String,
    },

    /// Connect every enabled server and list their tools
    Tools,

    /// Call a tool by its qualified name (`server.tool`)
    Call {
        tool: String,
        /// Arguments as a JSON object
        #[arg(long = "args", default_value = "{}")]
        args: String,
        /// Run even when the call needs confirmation
        #[arg(long)]
        confirm: bool,
    },

    /// Assess a script without running it
    Check {
        #[command(flatten)]
        source: ScriptSource,
    },

    /// Assess and run a script in the sandbox
    Run {
        #[command(flatten)]
        source: ScriptSource,
    },

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ServersCommand {
    /// List configured servers
    List,

    /// Add or replace a server
    Add {
        name: String,
        command: String,
        /// Argument passed to the command (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variable as KEY=VALUE (repeatable)
        #[arg(long = "env")]
        env: Vec<String>,
        /// Working directory (absolute)
        #[arg(long)]
        cwd: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Store the server disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a server
    Remove { name: String },

    /// Import servers from an `mcpServers` JSON document
    Import { file: PathBuf },

    /// Print all servers as an `mcpServers` JSON document
    Export,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Show effective settings
    Show,

    /// Set one setting; `none` clears it
    Set { key: String, value: String },
}

/// Where a script comes from.
#[derive(Debug, Args)]
pub struct ScriptSource {
    /// Script file; `-` reads stdin
    pub path: Option<PathBuf>,

    /// Inline script source
    #[arg(short = 'c', long = "code", conflicts_with = "path")]
    pub code: Option<String>,

    /// Treat the input as an assistant reply and use its first code block
    #[arg(long)]
    pub from_reply: bool,
}
