//! Commands run end to end against a temporary config directory.

use clap::Parser;
use meshmate_cli::{Cli, CliError, FilePreferenceStore, exit_code_for, run};
use meshmate_core::PreferenceStore;
use tempfile::TempDir;

fn meshmate(dir: &TempDir, args: &[&str]) -> anyhow::Result<()> {
    let config_dir = dir.path().to_str().unwrap();
    let argv = ["meshmate", "--config-dir", config_dir]
        .into_iter()
        .chain(args.iter().copied());
    run(Cli::parse_from(argv))
}

fn stored(dir: &TempDir, key: &str) -> Option<String> {
    FilePreferenceStore::open(dir.path().join("preferences.json"))
        .unwrap()
        .get(key)
        .unwrap()
}

#[test]
fn test_settings_set_persists() {
    let dir = TempDir::new().unwrap();
    meshmate(&dir, &["settings", "set", "max_tool_iterations", "5"]).unwrap();

    let settings = stored(&dir, "meshmate.settings").unwrap();
    assert!(settings.contains("\"max_tool_iterations\": 5"), "{settings}");

    let err = meshmate(&dir, &["settings", "set", "max_tool_iterations", "500"]).unwrap_err();
    assert_eq!(exit_code_for(&err), 78);
    let err = meshmate(&dir, &["settings", "set", "no_such_key", "1"]).unwrap_err();
    assert_eq!(exit_code_for(&err), 2);
}

#[test]
fn test_servers_add_and_remove() {
    let dir = TempDir::new().unwrap();
    meshmate(
        &dir,
        &["servers", "add", "files", "npx", "--arg", "-y", "--arg", "fs-server", "--disabled"],
    )
    .unwrap();

    let servers = stored(&dir, "meshmate.servers").unwrap();
    assert!(servers.contains("\"files\""));
    assert!(servers.contains("fs-server"));

    meshmate(&dir, &["servers", "remove", "files"]).unwrap();
    let servers = stored(&dir, "meshmate.servers").unwrap();
    assert!(!servers.contains("\"files\""));

    let err = meshmate(&dir, &["servers", "remove", "files"]).unwrap_err();
    assert_eq!(exit_code_for(&err), 2);
}

#[test]
fn test_connect_disabled_server_fails() {
    let dir = TempDir::new().unwrap();
    // The default server is seeded disabled on first start.
    let err = meshmate(&dir, &["connect", "sequential-thinking"]).unwrap_err();
    assert_eq!(exit_code_for(&err), 69);
}

#[test]
fn test_run_and_check_scripts() {
    let dir = TempDir::new().unwrap();
    meshmate(&dir, &["run", "--code", "import \"scene\" as scene; scene::add_cube(\"Box\", 1.0);"])
        .unwrap();

    let err = meshmate(&dir, &["run", "--code", "throw \"boom\";"]).unwrap_err();
    assert_eq!(exit_code_for(&err), 1);

    let err = meshmate(&dir, &["check", "--code", "import os; os.system('ls')"]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CliError>(),
        Some(CliError::Execution { .. })
    ));
    assert_eq!(exit_code_for(&err), 77);

    meshmate(&dir, &["check", "--code", "print(1);"]).unwrap();
}
