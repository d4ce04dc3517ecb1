//! Configuration directory resolution.

use std::path::{Path, PathBuf};

use crate::error::CliError;

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "MESHMATE_CONFIG_DIR";

const APP_DIR: &str = "meshmate";
const PREFERENCES_FILE: &str = "preferences.json";

/// Resolve the configuration directory.
///
/// Resolution order:
/// 1. Explicit path provided by caller
/// 2. `MESHMATE_CONFIG_DIR` environment variable
/// 3. `<system config dir>/meshmate`
pub fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf, CliError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| CliError::Config("cannot determine the system config directory".into()))
}

pub fn preferences_path(config_dir: &Path) -> PathBuf {
    config_dir.join(PREFERENCES_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_wins() {
        let dir = resolve_config_dir(Some(Path::new("/tmp/meshmate-test"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/meshmate-test"));
        assert_eq!(
            preferences_path(&dir),
            PathBuf::from("/tmp/meshmate-test/preferences.json")
        );
    }
}
