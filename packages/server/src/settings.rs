//! Server Settings
//!
//! Loads `dbsettings.json` (or the file named by `DBGATE_CONFIG`). A missing
//! file is created with defaults so a fresh install starts without manual
//! setup. Engine settings are the flattened [`GatewayConfig`], so one file
//! carries both the listener and the engines:
//!
//! ```json
//! {
//!   "port": 5003,
//!   "bind_address": "0.0.0.0",
//!   "api_key": "change-me",
//!   "log_level": "info",
//!   "network_sql": { "host": "127.0.0.1", "user": "dbuser", "password": "dbpass" },
//!   "embedded_kv": { "root": "data/kv", "release_policy": "idle" },
//!   "backup": { "enabled": true, "database": "shop" }
//! }
//! ```
//!
//! # Environment Overrides
//!
//! - `DBGATE_PORT`: listener port
//! - `DBGATE_API_KEY`: shared secret
//! - `DBGATE_DB_PASSWORD`: networked engine password

use dbgate_core::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SETTINGS_FILE: &str = "dbsettings.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Listener, authentication and engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub bind_address: String,
    /// Shared secret every command must carry
    pub api_key: String,
    /// Default filter when `RUST_LOG` is unset
    pub log_level: String,
    #[serde(flatten)]
    pub gateway: GatewayConfig,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 5003,
            bind_address: "0.0.0.0".to_string(),
            api_key: "apikey".to_string(),
            log_level: "info".to_string(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerSettings {
    /// Resolve the settings path, load it, apply environment overrides and validate
    pub fn from_env() -> Result<Self, SettingsError> {
        let path = std::env::var("DBGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_FILE));

        let mut settings = Self::load(&path)?;
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from `path`, writing defaults there first if it does not exist
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            let defaults = Self::default();
            defaults.write(path)?;
            tracing::info!("📝 Created default settings at {}", path.display());
            return Ok(defaults);
        }

        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let body = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, body).map_err(io_err)
    }

    /// Apply `DBGATE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("DBGATE_PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| SettingsError::Invalid(format!("DBGATE_PORT '{}' is not a port", port)))?;
        }
        if let Some(key) = lookup("DBGATE_API_KEY") {
            self.api_key = key;
        }
        if let Some(password) = lookup("DBGATE_DB_PASSWORD") {
            self.gateway.network_sql.password = password;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.port == 0 {
            return Err(SettingsError::Invalid("port must be greater than 0".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(SettingsError::Invalid("api_key must not be empty".into()));
        }
        self.gateway
            .validate()
            .map_err(|e| SettingsError::Invalid(e.to_string()))
    }

    /// Socket address string for the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgate_core::config::ReleasePolicyKind;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join(DEFAULT_SETTINGS_FILE);

        let settings = ServerSettings::load(&path).unwrap();

        assert_eq!(settings, ServerSettings::default());
        assert!(path.exists());
        assert_eq!(ServerSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_flattened_engine_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_SETTINGS_FILE);
        std::fs::write(
            &path,
            r#"{"port": 8080, "api_key": "k",
                "embedded_kv": {"root": "kv", "release_policy": "immediate"},
                "backup": {"enabled": true, "database": "shop"}}"#,
        )
        .unwrap();

        let settings = ServerSettings::load(&path).unwrap();

        assert_eq!(settings.port, 8080);
        assert_eq!(settings.bind_address, "0.0.0.0");
        assert_eq!(
            settings.gateway.embedded_kv.release_policy,
            ReleasePolicyKind::Immediate
        );
        assert_eq!(settings.gateway.backup.database, "shop");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_SETTINGS_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            ServerSettings::load(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("DBGATE_PORT", "6000"),
            ("DBGATE_API_KEY", "s3cret"),
            ("DBGATE_DB_PASSWORD", "hunter2"),
        ]
        .into_iter()
        .collect();

        let mut settings = ServerSettings::default();
        settings
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.port, 6000);
        assert_eq!(settings.api_key, "s3cret");
        assert_eq!(settings.gateway.network_sql.password, "hunter2");
        assert_eq!(settings.listen_address(), "0.0.0.0:6000");
    }

    #[test]
    fn test_bad_port_override_rejected() {
        let mut settings = ServerSettings::default();
        let result = settings.apply_overrides(|name| {
            (name == "DBGATE_PORT").then(|| "eighty".to_string())
        });
        assert!(matches!(result, Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_validation() {
        let mut settings = ServerSettings::default();
        settings.port = 0;
        assert!(settings.validate().is_err());

        let mut settings = ServerSettings::default();
        settings.api_key = "  ".into();
        assert!(settings.validate().is_err());

        let mut settings = ServerSettings::default();
        settings.gateway.backup.enabled = true;
        settings.gateway.backup.database = "shop".into();
        settings.gateway.backup.interval_secs = 0;
        assert!(settings.validate().is_err());
    }
}
