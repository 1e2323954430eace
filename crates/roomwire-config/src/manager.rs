use crate::config::{Config, ConfigError, ConfigResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const ENV_VAR_PATTERN: &str = r"\$\{([^}]+)\}";
const MODULE_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)*$";

/// Configuration manager
#[derive(Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Arc<RwLock<Config>>,
    #[cfg(feature = "hot-reload")]
    watcher: Option<Arc<std::sync::Mutex<notify::RecommendedWatcher>>>,
}

impl ConfigManager {
    /// Load the configuration file, writing a default one if it is missing
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let config = if path.exists() {
            info!("Loading config from {:?}", path);
            Self::read_file(path).await?
        } else {
            info!("Config file not found, creating default config at {:?}", path);
            let default_config = Config::default();
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_string_pretty(&default_config)?;
            tokio::fs::write(path, &content).await?;
            default_config
        };

        Ok(Self::new(config, path.to_path_buf()))
    }

    /// Load from `~/.roomwire/config.json`
    pub async fn load_default() -> ConfigResult<Self> {
        let config_path = crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))?;
        Self::load(&config_path).await
    }

    /// Create a manager around an in-memory config
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            path,
            config: Arc::new(RwLock::new(config)),
            #[cfg(feature = "hot-reload")]
            watcher: None,
        }
    }

    /// Shared handle to the current config
    pub fn get(&self) -> Arc<RwLock<Config>> {
        Arc::clone(&self.config)
    }

    /// Clone of the current config
    pub async fn snapshot(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Write the current config back to its file
    pub async fn save(&self) -> ConfigResult<()> {
        self.save_to(&self.path).await?;
        info!("Config saved to {:?}", self.path);
        Ok(())
    }

    /// Write the current config to `path`
    pub async fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let config = self.config.read().await;
        let content = serde_json::to_string_pretty(&*config)?;
        drop(config);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Re-read the file. The current config is kept if the new one is invalid.
    pub async fn reload(&self) -> ConfigResult<()> {
        reload_into(&self.path, &self.config).await?;
        info!("Config reloaded from {:?}", self.path);
        Ok(())
    }

    /// Mutate, validate and save
    pub async fn update<F>(&self, f: F) -> ConfigResult<()>
    where
        F: FnOnce(&mut Config),
    {
        let mut config = self.config.write().await;
        let mut candidate = config.clone();
        f(&mut candidate);
        Self::validate(&candidate)?;
        *config = candidate;
        drop(config);
        self.save().await
    }

    /// Validate a config
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if !config.server.namespace.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "Namespace '{}' must start with '/'",
                config.server.namespace
            )));
        }

        if config.server.max_connections == Some(0) {
            return Err(ConfigError::Validation(
                "Server max_connections must be greater than 0".to_string(),
            ));
        }

        let module = Regex::new(MODULE_PATTERN)
            .map_err(|e| ConfigError::Validation(format!("Invalid module pattern: {}", e)))?;
        for name in config.logging.module_levels.keys() {
            if !module.is_match(name) {
                return Err(ConfigError::Validation(format!(
                    "Invalid log module path: {}",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Expand `${VAR}` and `${VAR:-default}` references
    pub fn expand_env_vars(content: &str) -> ConfigResult<String> {
        let re = Regex::new(ENV_VAR_PATTERN)
            .map_err(|e| ConfigError::Validation(format!("Invalid env pattern: {}", e)))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let (Some(full_match), Some(var_expr)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            let var_expr = var_expr.as_str();

            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            let replacement = match (std::env::var(var_name), default_value) {
                (Ok(val), _) => val,
                (Err(_), Some(default)) => default.to_string(),
                (Err(_), None) => return Err(ConfigError::EnvVarNotFound(var_name.to_string())),
            };

            result = result.replace(full_match.as_str(), &replacement);
        }

        Ok(result)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(path: &Path) -> ConfigResult<Config> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::expand_env_vars(&content)?;
        let config: Config = serde_json::from_str(&content)?;
        Self::validate(&config)?;
        Ok(config)
    }
}

async fn reload_into(path: &Path, config: &RwLock<Config>) -> ConfigResult<()> {
    if !path.exists() {
        return Err(ConfigError::InvalidPath(format!(
            "Config file not found: {:?}",
            path
        )));
    }
    let new_config = ConfigManager::read_file(path).await?;
    *config.write().await = new_config;
    Ok(())
}

#[cfg(feature = "hot-reload")]
impl ConfigManager {
    /// Reload the config whenever the file changes, then call `callback`.
    ///
    /// Must be called from inside a Tokio runtime; reloads run on it.
    pub fn watch<F>(&mut self, callback: F) -> ConfigResult<()>
    where
        F: Fn(&Config) + Send + 'static,
    {
        use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
        use std::sync::mpsc::channel;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ConfigError::Validation(format!("Config watch needs a runtime: {}", e)))?;
        let path = self.path.clone();
        let config = Arc::clone(&self.config);

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    if event.kind.is_modify() {
                        let _ = tx.send(());
                    }
                }
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        self.watcher = Some(Arc::new(std::sync::Mutex::new(watcher)));

        // Exits once the watcher, and with it the sender, is dropped
        std::thread::spawn(move || {
            while rx.recv().is_ok() {
                debug!("Config file changed, reloading...");
                let reloaded = runtime.block_on(async {
                    reload_into(&path, &config).await?;
                    Ok::<Config, ConfigError>(config.read().await.clone())
                });
                match reloaded {
                    Ok(current) => {
                        info!("Config hot-reloaded successfully");
                        callback(&current);
                    }
                    Err(e) => warn!("Failed to hot-reload config: {}", e),
                }
            }
        });

        info!("Started watching config file: {:?}", self.path);
        Ok(())
    }

    /// Stop watching the file
    pub fn unwatch(&mut self) -> ConfigResult<()> {
        if let Some(watcher) = self.watcher.take() {
            use notify::Watcher;
            if let Ok(mut w) = watcher.lock() {
                w.unwatch(&self.path)?;
            }
            info!("Stopped watching config file");
        }
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }
}
