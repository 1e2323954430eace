use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use roomwire_core::ServerConfig;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Read a value by dotted key, e.g. `server.namespace`
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["server", "namespace"] => Some(self.server.namespace.clone()),
            ["server", "max_connections"] => self.server.max_connections.map(|n| n.to_string()),
            ["logging", "level"] => Some(self.logging.level.to_string()),
            ["logging", "json_format"] => Some(self.logging.json_format.to_string()),
            ["logging", "include_target"] => Some(self.logging.include_target.to_string()),
            ["logging", "file"] => self.logging.file.clone(),
            ["logging", "modules", module] => self
                .logging
                .module_levels
                .get(*module)
                .map(ToString::to_string),
            _ => None,
        }
    }

    /// Set a value by dotted key.
    ///
    /// `server.max_connections` accepts `none` to lift the limit.
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["server", "namespace"] => {
                self.server.namespace = value.to_string();
            }
            ["server", "max_connections"] => {
                self.server.max_connections = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(value.parse().map_err(|_| {
                        ConfigError::Validation(format!("Invalid number: {}", value))
                    })?)
                };
            }
            ["logging", "level"] => {
                self.logging.level = value.parse()?;
            }
            ["logging", "json_format"] => {
                self.logging.json_format = parse_bool(value)?;
            }
            ["logging", "include_target"] => {
                self.logging.include_target = parse_bool(value)?;
            }
            ["logging", "file"] => {
                self.logging.file = Some(value.to_string());
            }
            ["logging", "modules", module] => {
                self.logging
                    .module_levels
                    .insert((*module).to_string(), value.parse()?);
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> ConfigResult<bool> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid boolean: {}", value)))
}

/// Log level
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub json_format: bool,
    #[serde(default = "default_include_target")]
    pub include_target: bool,
    /// Log file path; logs go to stderr when unset
    #[serde(default)]
    pub file: Option<String>,
    /// Per-module overrides, e.g. `"roomwire_core::middleware": "debug"`
    #[serde(default)]
    pub module_levels: BTreeMap<String, LogLevel>,
}

fn default_include_target() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            include_target: true,
            file: None,
            module_levels: BTreeMap::new(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Watch error: {0}")]
    #[cfg(feature = "hot-reload")]
    Watch(#[from] notify::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.namespace, "/");
        assert_eq!(config.server.max_connections, None);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"version": "0.1.0"}"#).unwrap();
        assert_eq!(config.server, ServerConfig::default());
        assert!(config.logging.include_target);
    }

    #[test]
    fn test_get_and_set_value() {
        let mut config = Config::default();

        config.set_value("server.max_connections", "10").unwrap();
        assert_eq!(config.get_value("server.max_connections"), Some("10".to_string()));
        config.set_value("server.max_connections", "none").unwrap();
        assert_eq!(config.get_value("server.max_connections"), None);

        config.set_value("logging.level", "WARNING").unwrap();
        assert_eq!(config.get_value("logging.level"), Some("warn".to_string()));

        config
            .set_value("logging.modules.roomwire_core", "trace")
            .unwrap();
        assert_eq!(
            config.get_value("logging.modules.roomwire_core"),
            Some("trace".to_string())
        );
    }

    #[test]
    fn test_set_value_errors() {
        let mut config = Config::default();
        assert!(matches!(
            config.set_value("server.port", "80"),
            Err(ConfigError::KeyNotFound(_))
        ));
        assert!(matches!(
            config.set_value("logging.json_format", "maybe"),
            Err(ConfigError::Validation(_))
        ));
        assert!(config.set_value("logging.level", "loud").is_err());
    }
}
