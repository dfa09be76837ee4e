//! Configuration file resolution and loading

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Application directory name under the platform config dir
pub const APP_DIR: &str = "clipdeck";

/// Config file name inside [`APP_DIR`]
pub const CONFIG_FILE: &str = "config.toml";

/// Config file resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. OS-dependent default location (fallback)
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    default_config_path()
}

/// Get default configuration file path for the platform
///
/// Linux also honours `/etc/clipdeck/config.toml` when no user file exists.
pub fn default_config_path() -> Result<PathBuf> {
    let user_config = dirs::config_dir()
        .map(|d| d.join(APP_DIR).join(CONFIG_FILE))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if cfg!(target_os = "linux") && !user_config.exists() {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILE);
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Ok(user_config)
}

/// Load a TOML document into `T`
///
/// A missing file is not an error: defaults are returned and a warning is
/// logged so a first run works without any setup. A file that exists but
/// does not parse is reported as [`Error::Toml`].
pub fn load_toml_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!("Loading configuration from {}", path.display());
            Ok(toml::from_str(&content)?)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Config file {} not found, using defaults",
                path.display()
            );
            Ok(T::default())
        }
        Err(e) => Err(Error::Io(e)),
    }
}
