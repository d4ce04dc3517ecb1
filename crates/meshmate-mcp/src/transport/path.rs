//! Executable lookup and child `PATH` construction.
//!
//! Server commands are usually bare names (`npx`, `uvx`) that must be found
//! on `PATH`. Hosts started from a desktop launcher often run with a minimal
//! `PATH`, so the child gets an enriched one.

use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[cfg(unix)]
const PATH_SEPARATOR: &str = ":";
#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";

/// Extra locations searched on macOS, where launcher-started apps get a bare PATH.
#[cfg(target_os = "macos")]
const MACOS_DEFAULT_PATHS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin", "/bin"];

#[cfg(windows)]
const WINDOWS_EXTENSIONS: &[&str] = &["exe", "cmd", "bat"];

/// Resolve `command` to an executable file.
///
/// Absolute paths are checked in place. Bare names are searched on the
/// effective `PATH` (process `PATH` plus `path_extra`).
pub fn resolve_executable(command: &str, path_extra: Option<&str>) -> Result<PathBuf, String> {
    let path = Path::new(command);
    if path.is_absolute() {
        validate_exe_path(path)?;
        return Ok(path.to_path_buf());
    }

    if path.components().count() > 1 {
        return Err(format!(
            "Relative executable paths are ambiguous, use a bare name or an absolute path: {command}"
        ));
    }

    search_entries(path_extra)
        .iter()
        .flat_map(|dir| candidates(Path::new(dir), command))
        .find(|candidate| validate_exe_path(candidate).is_ok())
        .ok_or_else(|| format!("Executable '{command}' not found on PATH"))
}

#[cfg(not(windows))]
fn candidates(dir: &Path, command: &str) -> Vec<PathBuf> {
    vec![dir.join(command)]
}

#[cfg(windows)]
fn candidates(dir: &Path, command: &str) -> Vec<PathBuf> {
    let mut found = vec![dir.join(command)];
    found.extend(
        WINDOWS_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{command}.{ext}"))),
    );
    found
}

/// Check that `path` is an existing executable file.
pub fn validate_exe_path(path: &Path) -> Result<(), String> {
    let display = path.display();

    if !path.exists() {
        return Err(format!("Executable not found: {display}"));
    }

    if !path.is_file() {
        return Err(format!("Executable path is not a file: {display}"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)
            .map_err(|e| format!("Failed to check permissions of {display}: {e}"))?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(format!("File is not executable: {display}"));
        }
    }

    Ok(())
}

/// Check that `cwd` exists and is a directory.
pub fn validate_working_dir(cwd: &str) -> Result<(), String> {
    let path = Path::new(cwd);

    if !path.exists() {
        return Err(format!("Working directory does not exist: {cwd}"));
    }

    if !path.is_dir() {
        return Err(format!("Working directory path is not a directory: {cwd}"));
    }

    Ok(())
}

/// `PATH` for the child: the executable's directory first, then the search
/// entries. Deduplicated, order preserved.
pub fn build_effective_path(exe_path: &Path, path_extra: Option<&str>) -> OsString {
    let mut entries = Vec::new();
    if let Some(dir) = exe_path.parent().and_then(Path::to_str) {
        if !dir.is_empty() {
            entries.push(dir.to_string());
        }
    }
    entries.extend(search_entries(path_extra));

    let mut seen = HashSet::new();
    let deduped: Vec<String> = entries
        .into_iter()
        .filter(|entry| seen.insert(entry.clone()))
        .collect();

    OsString::from(deduped.join(PATH_SEPARATOR))
}

fn search_entries(path_extra: Option<&str>) -> Vec<String> {
    let mut entries: Vec<String> = Vec::new();

    if let Some(extra) = path_extra {
        entries.extend(split_path(extra));
    }

    if let Some(current) = env::var_os("PATH") {
        if let Some(current) = current.to_str() {
            entries.extend(split_path(current));
        }
    }

    #[cfg(target_os = "macos")]
    entries.extend(MACOS_DEFAULT_PATHS.iter().map(|s| (*s).to_string()));

    entries
}

fn split_path(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(PATH_SEPARATOR)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
}
