//! Root CLI structure with global options.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;
use crate::paths::CONFIG_DIR_ENV;

/// Manage tool servers and run sandboxed scripts for the meshmate assistant.
#[derive(Debug, Parser)]
#[command(name = "meshmate")]
#[command(version)]
pub struct Cli {
    /// Directory holding preferences.json
    #[arg(long = "config-dir", global = true, env = CONFIG_DIR_ENV)]
    pub config_dir: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ServersCommand;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args() {
        let cli = Cli::parse_from(["meshmate", "--verbose", "--config-dir", "/tmp/mm", "tools"]);
        assert!(cli.verbose);
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/mm")));
        assert!(matches!(cli.command, Commands::Tools));
    }

    #[test]
    fn test_servers_add() {
        let cli = Cli::parse_from([
            "meshmate", "servers", "add", "files", "npx", "--arg", "-y", "--arg", "server-fs",
            "--env", "ROOT=/tmp", "--timeout", "10", "--disabled",
        ]);
        let Commands::Servers {
            command:
                ServersCommand::Add {
                    name,
                    command,
                    args,
                    env,
                    timeout,
                    disabled,
                    ..
                },
        } = cli.command
        else {
            panic!("expected servers add");
        };
        assert_eq!(name, "files");
        assert_eq!(command, "npx");
        assert_eq!(args, ["-y", "server-fs"]);
        assert_eq!(env, ["ROOT=/tmp"]);
        assert_eq!(timeout, Some(10));
        assert!(disabled);
    }

    #[test]
    fn test_call_and_run() {
        let cli = Cli::parse_from([
            "meshmate", "call", "echo.echo", "--args", "{\"message\":\"hi\"}", "--confirm",
        ]);
        assert!(matches!(
            cli.command,
            Commands::Call { ref tool, confirm: true, .. } if tool == "echo.echo"
        ));

        let cli = Cli::parse_from(["meshmate", "run", "--code", "print(1);"]);
        let Commands::Run { source } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(source.code.as_deref(), Some("print(1);"));
        assert!(!source.from_reply);
        assert!(source.path.is_none());
    }
}
