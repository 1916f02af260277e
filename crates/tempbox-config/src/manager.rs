use crate::{AppConfig, CacheBackendKind, ConfigError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tempbox_core::ProviderKind;

const ORG: &str = "io";
const AUTHOR: &str = "Tempbox";
const APP: &str = "Tempbox";

/// Points at an explicit config file instead of the platform location.
pub const CONFIG_PATH_ENV: &str = "TEMPBOX_CONFIG";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
    data_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from(ORG, AUTHOR, APP).ok_or(ConfigError::MissingDirectories)?;
        let data_dir = dirs.data_dir().to_path_buf();

        let config_path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => dirs.config_dir().join("config.toml"),
        };

        Self::at(config_path, data_dir)
    }

    pub fn at(config_path: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = config_path.into();
        let data_dir = data_dir.into();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&data_dir)?;

        if !config_path.exists() {
            let initial = AppConfig::default();
            let content = toml::to_string_pretty(&initial)?;
            fs::write(&config_path, content)?;
            tracing::info!(path = %config_path.display(), "wrote default config");
        }

        Ok(Self {
            config_path,
            data_dir,
        })
    }

    /// Reads the file and layers the process environment on top.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = self.load_file()?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_file(&self) -> Result<AppConfig, ConfigError> {
        let content = fs::read_to_string(&self.config_path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = lookup("TEMPBOX_BIND").filter(|v| !v.trim().is_empty()) {
        config.server.bind_addr = bind;
    } else if let Some(port) = lookup("PORT").filter(|v| !v.trim().is_empty()) {
        let port: u16 = port.trim().parse().map_err(|_| ConfigError::Invalid {
            key: "PORT".to_string(),
            message: format!("'{port}' is not a port number"),
        })?;
        let host = config
            .server
            .bind_addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.bind_addr = format!("{host}:{port}");
    }

    if let Some(url) = lookup("REDIS_URL").filter(|v| !v.trim().is_empty()) {
        config.cache.backend = CacheBackendKind::Redis;
        config.cache.redis_url = Some(url);
    }

    if let Some(key) = lookup("MAILSAC_API_KEY").filter(|v| !v.trim().is_empty()) {
        config.providers.mailsac.api_key = Some(key);
    }

    if let Some(name) = lookup("TEMPBOX_DEFAULT_PROVIDER") {
        config.providers.default_provider =
            name.parse::<ProviderKind>().map_err(|err| ConfigError::Invalid {
                key: "TEMPBOX_DEFAULT_PROVIDER".to_string(),
                message: err.to_string(),
            })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("tempbox-config-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn writes_defaults_on_first_run() {
        let dir = scratch_dir();
        let manager =
            ConfigManager::at(dir.join("config.toml"), dir.join("data")).expect("manager created");

        assert!(manager.config_path().exists());
        let loaded = manager.load_file().expect("config loaded");
        assert_eq!(loaded, AppConfig::default());
        assert_eq!(loaded.providers.failure_threshold, 3);
        assert_eq!(loaded.providers.rotation_window_secs, 300);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).expect("dir created");
        let path = dir.join("config.toml");
        fs::write(&path, "[providers]\ndefault_provider = \"mailsac\"\n").expect("written");

        let manager = ConfigManager::at(&path, dir.join("data")).expect("manager created");
        let loaded = manager.load_file().expect("config loaded");
        assert_eq!(loaded.providers.default_provider, ProviderKind::Mailsac);
        assert_eq!(loaded.retry.max_attempts, 3);
        assert_eq!(loaded.providers.mailsac.domain, "mailsac.com");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("PORT", "8080"),
            ("REDIS_URL", "redis://127.0.0.1:6379"),
            ("MAILSAC_API_KEY", "k_123"),
            ("TEMPBOX_DEFAULT_PROVIDER", "mailsac"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()))
            .expect("overrides applied");

        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.providers.mailsac.api_key.as_deref(), Some("k_123"));
        assert_eq!(config.providers.default_provider, ProviderKind::Mailsac);
    }

    #[test]
    fn rejects_garbage_port() {
        let mut config = AppConfig::default();
        let result = apply_env_overrides(&mut config, |key| {
            (key == "PORT").then(|| "eighty".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
