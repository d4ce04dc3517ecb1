//! CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use meshmate_cli::{Cli, exit_code_for, init_tracing, run};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}
