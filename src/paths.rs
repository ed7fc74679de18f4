//! Path resolution for rigger
//!
//! # Environment Variables
//!
//! - `RIGGER_STATE_DIR` - Override the state directory
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `RIGGER_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/rigger` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\rigger`
//!    - macOS/Linux: `~/.local/state/rigger`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "RIGGER_STATE_DIR";

/// SQLite database holding node state and budget rules
pub const LEDGER_FILE: &str = "ledger.db";

/// JSON file backing the sandbox provider
pub const SANDBOX_FILE: &str = "sandbox.json";

/// Get the rigger state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("rigger");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("rigger");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("rigger");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Expand `path` and, when relative, anchor it at `base`
pub fn resolve_relative(base: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/test/path");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("test").join("path"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_RIGGER_VAR_12345/file");
        assert_eq!(
            result,
            PathBuf::from("/path/$NONEXISTENT_RIGGER_VAR_12345/file")
        );
    }

    #[test]
    fn test_resolve_relative() {
        let base = Path::new("/etc/rigger");
        assert_eq!(
            resolve_relative(base, "metadata.xml"),
            PathBuf::from("/etc/rigger/metadata.xml")
        );
        assert_eq!(
            resolve_relative(base, "/opt/metadata.xml"),
            PathBuf::from("/opt/metadata.xml")
        );
    }
}
