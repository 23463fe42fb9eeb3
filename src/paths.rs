//! Where atlas-reconcile keeps `settings.toml` and `credentials.toml`.
//!
//! The directory is the first of:
//! 1. `$ATLAS_RECONCILE_CONFIG_DIR` (`~` and variables expanded)
//! 2. `$XDG_CONFIG_HOME/atlas-reconcile`
//! 3. `~/.config/atlas-reconcile`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Overrides the config directory when set
pub const ENV_CONFIG_DIR: &str = "ATLAS_RECONCILE_CONFIG_DIR";

const APP_DIR: &str = "atlas-reconcile";

/// Resolve the config directory. It is not created.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Config dir from ${ENV_CONFIG_DIR}: {}", path.display());
        return Ok(path);
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg).join(APP_DIR);
        log::debug!("Config dir from $XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP_DIR);
    log::debug!("Config dir defaulted to {}", path.display());
    Ok(path)
}

/// Path of the settings file
pub fn settings_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("settings.toml"))
}

/// Path of the default credentials file
pub fn credentials_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("credentials.toml"))
}

/// Expand `~` and environment variables in a path.
///
/// Falls back to the input unchanged when a variable is undefined.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
