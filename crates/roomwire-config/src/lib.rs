pub mod config;
pub mod manager;

pub use config::{Config, ConfigError, ConfigResult, LogLevel, LoggingConfig, ServerConfig};
pub use manager::ConfigManager;

use std::path::PathBuf;

/// Roomwire configuration directory (`~/.roomwire`)
pub fn roomwire_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".roomwire"))
}

/// Default configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    roomwire_dir().map(|dir| dir.join("config.json"))
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    if path == "~" {
        dirs::home_dir()
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir().map(|home| home.join(rest))
    } else {
        Some(PathBuf::from(path))
    }
}
