//! User configuration file location.
//!
//! Location: $XDG_CONFIG_HOME/nakadachi/nakadachi.toml
//! Fallback: the platform config directory (`~/.config` on Linux)

use std::path::PathBuf;

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/nakadachi/nakadachi.toml
/// 2. Otherwise: <platform config dir>/nakadachi/nakadachi.toml
///
/// Returns None if neither can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
        && !xdg_config.is_empty()
    {
        return Some(PathBuf::from(xdg_config).join("nakadachi").join("nakadachi.toml"));
    }

    dirs::config_dir().map(|dir| dir.join("nakadachi").join("nakadachi.toml"))
}
