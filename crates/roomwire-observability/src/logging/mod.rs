//! Structured logging
//!
//! Installs the global `tracing` subscriber from a [`LoggingConfig`] and keeps
//! a reload handle so the level can change at runtime.

use std::fmt;
use std::path::Path;

use parking_lot::RwLock;
use roomwire_config::{expand_tilde, LogLevel, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::Directive,
    fmt::{time::UtcTime, writer::BoxMakeWriter},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::error::{ObservabilityError, Result};

type ReloadHandle = Handle<EnvFilter, Registry>;

/// Owner of the installed subscriber
pub struct LogManager {
    config: RwLock<LoggingConfig>,
    reload_handle: ReloadHandle,
    /// Flushes the file writer on drop
    guard: Option<WorkerGuard>,
}

impl fmt::Debug for LogManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogManager")
            .field("config", &*self.config.read())
            .field("file_writer", &self.guard.is_some())
            .finish()
    }
}

impl LogManager {
    /// Install the global subscriber.
    ///
    /// Fails if a global subscriber is already set.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let filter = build_filter(config)?;
        let (filter, reload_handle) = reload::Layer::new(filter);
        let (writer, guard) = make_writer(config)?;
        let ansi = guard.is_none();

        let registry = tracing_subscriber::registry().with(filter);
        let installed = if config.json_format {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(config.include_target)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            registry.with(layer).try_init()
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(config.include_target)
                .with_ansi(ansi)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            registry.with(layer).try_init()
        };
        installed.map_err(|e| ObservabilityError::init(e.to_string()))?;

        tracing::info!(
            target: "roomwire_observability",
            "Logging initialized with level: {}",
            config.level
        );

        Ok(Self {
            config: RwLock::new(config.clone()),
            reload_handle,
            guard,
        })
    }

    /// Change the base level, keeping module overrides
    pub fn update_level(&self, level: LogLevel) -> Result<()> {
        let mut config = self.config.read().clone();
        config.level = level;
        self.apply(&config)
    }

    /// Rebuild the filter from `config`. Output format changes need a restart.
    pub fn apply(&self, config: &LoggingConfig) -> Result<()> {
        let new_filter = build_filter(config)?;
        self.reload_handle
            .modify(|filter| *filter = new_filter)
            .map_err(|e| ObservabilityError::logging(format!("Failed to update filter: {}", e)))?;
        *self.config.write() = config.clone();

        tracing::info!(
            target: "roomwire_observability",
            "Log level updated to: {}",
            config.level
        );
        Ok(())
    }

    /// Current logging config
    pub fn config(&self) -> LoggingConfig {
        self.config.read().clone()
    }
}

/// Build the filter: base level plus one directive per module override
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(config.level.as_str())
        .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

    for (module, level) in &config.module_levels {
        let directive: Directive = format!("{}={}", module, level)
            .parse()
            .map_err(|e| ObservabilityError::logging(format!("Invalid directive: {}", e)))?;
        filter = filter.add_directive(directive);
    }

    Ok(filter)
}

fn make_writer(config: &LoggingConfig) -> Result<(BoxMakeWriter, Option<WorkerGuard>)> {
    let Some(file) = config.file.as_deref() else {
        return Ok((BoxMakeWriter::new(std::io::stderr), None));
    };

    let path = expand_tilde(file)
        .ok_or_else(|| ObservabilityError::config(format!("Cannot resolve log file: {}", file)))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ObservabilityError::config(format!("Invalid log file: {}", file)))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .map_err(|e| ObservabilityError::init(format!("Cannot open log file: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((BoxMakeWriter::new(writer), Some(guard)))
}

/// Span for work scoped to one namespace
pub fn create_namespace_span(namespace: &str) -> tracing::Span {
    tracing::info_span!("namespace", namespace = %namespace)
}

/// Span for work scoped to one socket
pub fn create_socket_span(socket_id: &str, namespace: Option<&str>) -> tracing::Span {
    if let Some(ns) = namespace {
        tracing::info_span!(
            "socket",
            socket_id = %socket_id,
            namespace = %ns,
        )
    } else {
        tracing::info_span!("socket", socket_id = %socket_id)
    }
}
