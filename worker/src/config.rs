//! Configuration loading (see spec §6 "Configuration").
//!
//! The worker is handed a YAML file path on the command line; everything
//! the coordinator, the datasource and the HTTP layer need comes from one
//! parsed [`Config`] value, the way the source threads one `worker_defaults`
//! mapping through the whole process.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub resource_api_server: String,
    pub resource_api_version: String,
    pub resource_api_token: String,
    #[serde(rename = "AUCTIONS_URL")]
    pub auctions_url: String,
    #[serde(rename = "HASH_SECRET")]
    pub hash_secret: String,
    #[serde(default)]
    pub with_document_service: bool,
    #[serde(rename = "DOCUMENT_SERVICE", default)]
    pub document_service: Option<DocumentServiceConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub datasource: DatasourceConfig,
    #[serde(default)]
    pub deadline: DeadlineConfig,
    #[serde(default)]
    pub sandbox_mode: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentServiceConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<String>,
}

/// `type` selects the [`crate::datasource::Datasource`] implementation;
/// everything else is variant-specific and threaded through unparsed.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub auction_id: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeadlineConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub deadline_time: DeadlineTime,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self { enabled: true, deadline_time: DeadlineTime::default() }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DeadlineTime {
    #[serde(default = "default_deadline_hour")]
    pub hour: i8,
    #[serde(default)]
    pub minute: i8,
    #[serde(default)]
    pub second: i8,
}

impl Default for DeadlineTime {
    fn default() -> Self {
        Self { hour: default_deadline_hour(), minute: 0, second: 0 }
    }
}

fn default_deadline_hour() -> i8 {
    crate::clock::DEADLINE_HOUR
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        serde_yaml::from_str(&raw).map_err(ConfigError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config() {
        let yaml = r#"
resource_api_server: "https://api.example.test"
resource_api_version: "2.5"
resource_api_token: "secret-token"
AUCTIONS_URL: "https://auctions.example.test/{auction_id}"
HASH_SECRET: "hash-secret"
datasource:
  type: test
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.datasource.kind, "test");
        assert!(!config.with_document_service);
        assert_eq!(config.deadline.deadline_time.hour, crate::clock::DEADLINE_HOUR);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::load("/nonexistent/path/does-not-exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
