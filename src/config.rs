use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// The shared mailbox the service account impersonates
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_service_account_key")]
    pub service_account_key: PathBuf,
    #[serde(default = "default_search_window_days")]
    pub search_window_days: u32,
    #[serde(default = "default_excluded_subjects")]
    pub excluded_subjects: Vec<String>,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            service_account_key: default_service_account_key(),
            search_window_days: default_search_window_days(),
            excluded_subjects: default_excluded_subjects(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    #[serde(default = "default_time_budget_secs")]
    pub time_budget_secs: u64,
    #[serde(default = "default_inter_message_delay_ms")]
    pub inter_message_delay_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_max_error_details")]
    pub max_error_details: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            time_budget_secs: default_time_budget_secs(),
            inter_message_delay_ms: default_inter_message_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            max_error_details: default_max_error_details(),
        }
    }
}

impl BatchConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

fn default_service_account_key() -> PathBuf {
    PathBuf::from("service-account.json")
}

fn default_search_window_days() -> u32 {
    2
}

fn default_excluded_subjects() -> Vec<String> {
    vec![
        "Leesbevestiging".to_string(),
        "Afleveringsbericht".to_string(),
    ]
}

fn default_max_messages() -> u32 {
    10
}

fn default_time_budget_secs() -> u64 {
    50
}

fn default_inter_message_delay_ms() -> u64 {
    750
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_max_error_details() -> usize {
    20
}

fn default_database_path() -> PathBuf {
    PathBuf::from("leads.db")
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IngestError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| IngestError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                IngestError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| IngestError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| IngestError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    ///
    /// An empty mailbox address passes here so a default config can be loaded and
    /// written out; [`Config::require_mailbox`] is checked before an invocation.
    pub fn validate(&self) -> Result<()> {
        let address = self.mailbox.address.trim();
        if !address.is_empty() && !address.contains('@') {
            return Err(IngestError::ConfigError(format!(
                "mailbox.address '{}' is not an email address",
                address
            )));
        }

        if self.mailbox.search_window_days == 0 {
            return Err(IngestError::ConfigError(
                "mailbox.search_window_days must be at least 1".to_string(),
            ));
        }

        for subject in &self.mailbox.excluded_subjects {
            if subject.trim().is_empty() {
                return Err(IngestError::ConfigError(
                    "mailbox.excluded_subjects cannot contain empty strings".to_string(),
                ));
            }
        }

        // Gmail caps a single list page at 500 results
        if self.batch.max_messages == 0 || self.batch.max_messages > 500 {
            return Err(IngestError::ConfigError(
                "batch.max_messages must be between 1 and 500".to_string(),
            ));
        }
        if self.batch.time_budget_secs == 0 {
            return Err(IngestError::ConfigError(
                "batch.time_budget_secs must be greater than 0".to_string(),
            ));
        }
        if self.batch.call_timeout_secs == 0 {
            return Err(IngestError::ConfigError(
                "batch.call_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.storage.database_path.as_os_str().is_empty() {
            return Err(IngestError::ConfigError(
                "storage.database_path cannot be empty".to_string(),
            ));
        }

        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(IngestError::ConfigError(format!(
                "server.bind_address '{}' is not a socket address",
                self.server.bind_address
            )));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// The mailbox address, or an error when none is configured
    pub fn require_mailbox(&self) -> Result<&str> {
        let address = self.mailbox.address.trim();
        if address.is_empty() {
            return Err(IngestError::ConfigError(
                "mailbox.address must be set".to_string(),
            ));
        }
        Ok(address)
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let mut config = Self::default();
        config.mailbox.address = "verkoop@example.nl".to_string();
        config.save(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.mailbox.address, "");
        assert_eq!(config.mailbox.search_window_days, 2);
        assert_eq!(config.batch.max_messages, 10);
        assert_eq!(config.batch.time_budget_secs, 50);
        assert_eq!(config.batch.inter_message_delay_ms, 750);
        assert_eq!(config.batch.call_timeout_secs, 30);
        assert_eq!(config.batch.max_error_details, 20);
        assert_eq!(config.storage.database_path, PathBuf::from("leads.db"));
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations() {
        let batch = BatchConfig::default();
        assert_eq!(batch.time_budget(), Duration::from_secs(50));
        assert_eq!(batch.inter_message_delay(), Duration::from_millis(750));
        assert_eq!(batch.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validation_mailbox_address() {
        let mut config = Config::default();
        config.mailbox.address = "not-an-address".to_string();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("is not an email address"));

        config.mailbox.address = "verkoop@autobedrijf.nl".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_require_mailbox() {
        let mut config = Config::default();
        assert!(config.require_mailbox().is_err());

        config.mailbox.address = "  verkoop@autobedrijf.nl ".to_string();
        assert_eq!(config.require_mailbox().unwrap(), "verkoop@autobedrijf.nl");
    }

    #[test]
    fn test_validation_search_window() {
        let mut config = Config::default();
        config.mailbox.search_window_days = 0;
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("search_window_days must be at least 1"));
    }

    #[test]
    fn test_validation_excluded_subjects() {
        let mut config = Config::default();
        config.mailbox.excluded_subjects = vec!["Leesbevestiging".to_string(), " ".to_string()];
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("excluded_subjects cannot contain empty strings"));
    }

    #[test]
    fn test_validation_max_messages_boundaries() {
        let mut config = Config::default();

        config.batch.max_messages = 0;
        assert!(config.validate().is_err());

        config.batch.max_messages = 1;
        assert!(config.validate().is_ok());

        config.batch.max_messages = 500;
        assert!(config.validate().is_ok());

        config.batch.max_messages = 501;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_budget_and_timeout() {
        let mut config = Config::default();
        config.batch.time_budget_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.batch.call_timeout_secs = 0;
        assert!(config.validate().is_err());

        // No delay between messages is allowed
        let mut config = Config::default();
        config.batch.inter_message_delay_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_bind_address() {
        let mut config = Config::default();
        config.server.bind_address = "localhost".to_string();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("is not a socket address"));

        config.server.bind_address = "127.0.0.1:3000".to_string();
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_config_load_save_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let mut config = Config::default();
        config.mailbox.address = "verkoop@autobedrijf.nl".to_string();
        config.batch.max_messages = 25;
        config.save(path).await.unwrap();

        let loaded = Config::load(path).await.unwrap();

        assert_eq!(loaded.mailbox.address, "verkoop@autobedrijf.nl");
        assert_eq!(loaded.batch.max_messages, 25);
        assert_eq!(loaded.mailbox.excluded_subjects, config.mailbox.excluded_subjects);
        assert_eq!(loaded.storage.database_path, config.storage.database_path);
    }

    #[tokio::test]
    async fn test_config_load_nonexistent_returns_default() {
        let path = Path::new("/tmp/nonexistent-lead-ingest-config-12345.toml");

        let config = Config::load(path).await.unwrap();

        assert_eq!(config.batch.max_messages, 10);
        assert_eq!(config.mailbox.search_window_days, 2);
    }

    #[tokio::test]
    async fn test_config_load_invalid_toml() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        tokio::fs::write(path, "this is not valid toml {[}]")
            .await
            .unwrap();

        let result = Config::load(path).await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse config file"));
    }

    #[tokio::test]
    async fn test_config_load_rejects_invalid_values() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        tokio::fs::write(path, "[batch]\nmax_messages = 0\n")
            .await
            .unwrap();

        assert!(Config::load(path).await.is_err());
    }

    #[tokio::test]
    async fn test_config_partial_with_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        let partial_config = r#"
[mailbox]
address = "verkoop@autobedrijf.nl"

[batch]
time_budget_secs = 20
"#;
        tokio::fs::write(path, partial_config).await.unwrap();

        let config = Config::load(path).await.unwrap();

        assert_eq!(config.mailbox.address, "verkoop@autobedrijf.nl");
        assert_eq!(config.batch.time_budget_secs, 20);

        assert_eq!(config.batch.max_messages, 10);
        assert_eq!(config.mailbox.search_window_days, 2);
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_config_create_example() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        Config::create_example(path).await.unwrap();

        assert!(path.exists());

        let config = Config::load(path).await.unwrap();
        assert_eq!(config.require_mailbox().unwrap(), "verkoop@example.nl");
    }
}
