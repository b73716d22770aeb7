use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{CONFIG_FILE_NAME, CONFIG_PATH_ENV, HOME_CONFIG_DIR, HOME_CONFIG_FILE_NAME};
use crate::debug::DebugConfig;
use crate::sandbox::SandboxConfig;

/// Root of `ctxopt.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CtxoptConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub debug: DebugConfig,
}

impl CtxoptConfig {
    pub fn validate(&self) -> Result<()> {
        self.sandbox.validate()
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Workspace(PathBuf),
    User(PathBuf),
    Defaults,
}

/// Loaded configuration plus its origin.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: CtxoptConfig,
    source: ConfigSource,
}

impl ConfigManager {
    /// Load configuration for `workspace`.
    ///
    /// Lookup order: `explicit` path, `CTXOPT_CONFIG_PATH`, `<workspace>/ctxopt.toml`,
    /// `~/.ctxopt/config.toml`, built-in defaults. The first file found wins.
    pub fn load(explicit: Option<&Path>, workspace: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path, ConfigSource::Explicit(path.to_path_buf()));
        }

        if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
            let trimmed = config_path.trim();
            if !trimmed.is_empty() {
                let path = PathBuf::from(trimmed);
                return Self::load_from_file(&path, ConfigSource::Explicit(path.clone()))
                    .with_context(|| {
                        format!("Failed to load configuration from {CONFIG_PATH_ENV}={trimmed}")
                    });
            }
        }

        let workspace_config = workspace.join(CONFIG_FILE_NAME);
        if workspace_config.exists() {
            return Self::load_from_file(
                &workspace_config,
                ConfigSource::Workspace(workspace_config.clone()),
            );
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(HOME_CONFIG_DIR).join(HOME_CONFIG_FILE_NAME);
            if user_config.exists() {
                return Self::load_from_file(&user_config, ConfigSource::User(user_config.clone()));
            }
        }

        let config = CtxoptConfig::default();
        config
            .validate()
            .context("Default configuration failed validation")?;
        debug!("no config file found; using defaults");
        Ok(Self {
            config,
            source: ConfigSource::Defaults,
        })
    }

    fn load_from_file(path: &Path, source: ConfigSource) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CtxoptConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Configuration failed validation: {}", path.display()))?;

        debug!(path = %path.display(), "loaded configuration");
        Ok(Self { config, source })
    }

    pub fn config(&self) -> &CtxoptConfig {
        &self.config
    }

    pub fn into_config(self) -> CtxoptConfig {
        self.config
    }

    pub fn source(&self) -> &ConfigSource {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn workspace_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "[sandbox]\ntimeout_ms = 2500\n\n[debug]\ntrace_level = \"debug\"\n",
        )
        .unwrap();

        let manager = ConfigManager::load(None, tmp.path()).unwrap();
        assert_eq!(manager.config().sandbox.timeout_ms, 2_500);
        assert!(matches!(manager.source(), ConfigSource::Workspace(_)));
    }

    #[test]
    #[serial]
    fn explicit_file_must_validate() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("custom.toml");
        fs::write(&path, "[sandbox]\nmemory_limit_mb = 1\n").unwrap();

        let err = ConfigManager::load(Some(&path), tmp.path()).unwrap_err();
        assert!(format!("{err:#}").contains("memory_limit_mb"));
    }
}
