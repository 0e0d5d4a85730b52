use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::logging::LoggingConfig;
use crate::storage::{LegWriteMode, ReplicationSettings};

/// Storage layer configuration
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StorageSettings {
    /// Directory for multi-storage staging files
    pub temp_folder: PathBuf,
    /// sqlx SQLite URL of the storage catalogue
    pub database_url: String,
    /// How multi-storage writes reach their legs
    #[serde(default)]
    pub leg_write_mode: LegWriteMode,
    /// File holding the field encryption key, created on first use
    pub secret_key_path: PathBuf,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Logging configuration
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub structured: bool,
    /// Full filter directive, overrides `level` (e.g. "backup_storages=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            temp_folder: PathBuf::from("staging"),
            database_url: "sqlite://backup-storages.db".to_string(),
            leg_write_mode: LegWriteMode::Sequential,
            secret_key_path: PathBuf::from("secret.key"),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            env_filter: None,
        }
    }
}

impl StorageSettings {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StorageSettings = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from file if present, then apply environment overrides
    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(temp_folder) = std::env::var("BACKUP_STORAGES_TEMP_FOLDER") {
            self.temp_folder = PathBuf::from(temp_folder);
        }

        if let Ok(database_url) = std::env::var("BACKUP_STORAGES_DATABASE_URL") {
            self.database_url = database_url;
        }

        if let Ok(mode) = std::env::var("BACKUP_STORAGES_LEG_WRITE_MODE") {
            match mode.parse::<LegWriteMode>() {
                Ok(mode) => self.leg_write_mode = mode,
                Err(e) => tracing::warn!(error = %e, "Ignoring BACKUP_STORAGES_LEG_WRITE_MODE"),
            }
        }

        if let Ok(path) = std::env::var("BACKUP_STORAGES_SECRET_KEY_PATH") {
            self.secret_key_path = PathBuf::from(path);
        }

        if let Ok(log_level) = std::env::var("BACKUP_STORAGES_LOG_LEVEL") {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.temp_folder.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Temp folder must not be empty"));
        }

        if self.database_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Database URL must not be empty"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }

        Ok(())
    }

    /// Settings handed to every resolved multi-storage
    pub fn replication(&self) -> ReplicationSettings {
        ReplicationSettings::new(self.temp_folder.clone()).with_write_mode(self.leg_write_mode)
    }

    pub fn logging_config(&self) -> Result<LoggingConfig> {
        Ok(LoggingConfig {
            level: self.logging.level.parse()?,
            structured: self.logging.structured,
            env_filter: self.logging.env_filter.clone(),
        })
    }
}
