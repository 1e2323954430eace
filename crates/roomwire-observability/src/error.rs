//! Observability error types

use roomwire_config::ConfigError;

/// Observability error
#[derive(Debug, thiserror::Error, Clone)]
pub enum ObservabilityError {
    /// Invalid logging configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Filter or reload failure
    #[error("Logging error: {message}")]
    Logging {
        /// Error message
        message: String,
    },

    /// Global subscriber could not be installed
    #[error("Initialization error: {message}")]
    Init {
        /// Error message
        message: String,
    },

    /// IO error
    #[error("IO error: {message}")]
    Io {
        /// Error message
        message: String,
    },
}

impl ObservabilityError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a logging error
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// Create an initialization error
    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    /// Error category
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Logging { .. } => "logging",
            Self::Init { .. } => "init",
            Self::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for ObservabilityError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<ConfigError> for ObservabilityError {
    fn from(err: ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, ObservabilityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(ObservabilityError::logging("x").category(), "logging");
        assert_eq!(ObservabilityError::init("x").category(), "init");

        let io: ObservabilityError = std::io::Error::other("disk full").into();
        assert_eq!(io.category(), "io");
        assert_eq!(io.to_string(), "IO error: disk full");
    }

    #[test]
    fn test_from_config_error() {
        let err: ObservabilityError = ConfigError::Validation("bad level".to_string()).into();
        assert_eq!(err.category(), "config");
        assert_eq!(
            err.to_string(),
            "Configuration error: Validation error: bad level"
        );
    }
}
