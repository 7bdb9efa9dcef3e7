// ABOUTME: Loads replicator configuration from a TOML file or the process environment
// ABOUTME: Validates connection settings, table mappings and sync tunables

use crate::sync::SyncSettings;
use crate::types::TableMapping;
use crate::utils::{validate_identifier, validate_project_id};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// BigQuery rejects insertAll requests above this many rows
const MAX_BATCH_SIZE: usize = 50_000;

fn default_port() -> u16 {
    3306
}

fn default_poll_interval_secs() -> u64 {
    4 * 60 * 60
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_rows_per_cycle() -> usize {
    10_000
}

fn default_drain_budget_secs() -> u64 {
    300
}

fn default_call_timeout_secs() -> u64 {
    300
}

/// MySQL/MariaDB connection settings
#[derive(Clone, Deserialize)]
pub struct SourceConfig {
    /// Full `mysql://` URL; takes precedence over the individual parts
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .finish()
    }
}

/// BigQuery project and dataset that receive the replicated tables
#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub project_id: String,
    pub dataset_id: String,
    /// Service account key file; application default credentials when unset
    #[serde(default)]
    pub credentials_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 0 reads every new row in one query
    #[serde(default = "default_max_rows_per_cycle")]
    pub max_rows_per_cycle: usize,
    /// 0 disables backlog draining
    #[serde(default = "default_drain_budget_secs")]
    pub drain_budget_secs: u64,
    /// 0 disables per-call timeouts
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub dead_letter_file: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            max_rows_per_cycle: default_max_rows_per_cycle(),
            drain_budget_secs: default_drain_budget_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            dead_letter_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to this file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatorConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub tables: Vec<TableMapping>,
}

/// Parse an optional variable, falling back to `default` when unset or blank
fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value '{}' for {}", raw, name)),
        None => Ok(default),
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, name).with_context(|| format!("Missing required environment variable {}", name))
}

fn positive_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl ReplicatorConfig {
    /// Build the configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = SourceConfig {
            url: non_empty(&lookup, "DB_URL"),
            host: non_empty(&lookup, "DB_HOST").unwrap_or_default(),
            port: parse_var(&lookup, "DB_PORT", default_port())?,
            user: non_empty(&lookup, "DB_USER"),
            // Passwords may legitimately contain surrounding whitespace
            password: lookup("DB_PASSWORD").filter(|p| !p.is_empty()),
            database: non_empty(&lookup, "DB_DATABASE"),
        };

        let destination = DestinationConfig {
            project_id: required(&lookup, "BQ_PROJECT_ID")?,
            dataset_id: required(&lookup, "BQ_DATASET_ID")?,
            credentials_file: non_empty(&lookup, "BQ_CREDENTIALS_FILE"),
        };

        let sync = SyncConfig {
            poll_interval_secs: parse_var(&lookup, "POLL_INTERVAL_SECS", default_poll_interval_secs())?,
            batch_size: parse_var(&lookup, "BATCH_SIZE", default_batch_size())?,
            max_rows_per_cycle: parse_var(&lookup, "MAX_ROWS_PER_CYCLE", default_max_rows_per_cycle())?,
            drain_budget_secs: parse_var(&lookup, "DRAIN_BUDGET_SECS", default_drain_budget_secs())?,
            call_timeout_secs: parse_var(&lookup, "CALL_TIMEOUT_SECS", default_call_timeout_secs())?,
            dead_letter_file: non_empty(&lookup, "DEAD_LETTER_FILE").map(PathBuf::from),
        };

        let logging = LoggingConfig {
            log_file: non_empty(&lookup, "LOG_FILE").map(PathBuf::from),
        };

        let id_column = non_empty(&lookup, "ID_COLUMN").unwrap_or_else(|| "id".to_string());
        let tables = required(&lookup, "SOURCE_TABLES")?
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| TableMapping::parse(entry, &id_column))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source,
            destination,
            sync,
            logging,
            tables,
        })
    }

    /// Check everything that can be checked without connecting anywhere
    pub fn validate(&self) -> Result<()> {
        if self.source.url.is_none() && self.source.host.is_empty() {
            bail!("Source database needs either a URL or a host");
        }

        validate_project_id(&self.destination.project_id)?;
        validate_identifier(&self.destination.dataset_id).context("Invalid BigQuery dataset ID")?;

        if self.tables.is_empty() {
            bail!("At least one table must be configured for replication");
        }

        let mut destinations = HashSet::new();
        for mapping in &self.tables {
            validate_identifier(&mapping.source)
                .with_context(|| format!("Invalid source table '{}'", mapping.source))?;
            validate_identifier(mapping.destination_table()).with_context(|| {
                format!("Invalid destination table '{}'", mapping.destination_table())
            })?;
            validate_identifier(&mapping.id_column)
                .with_context(|| format!("Invalid identifier column for '{}'", mapping.source))?;

            if !destinations.insert(mapping.destination_table()) {
                bail!(
                    "Destination table '{}' is mapped more than once",
                    mapping.destination_table()
                );
            }
        }

        if self.sync.poll_interval_secs == 0 {
            bail!("Poll interval must be at least 1 second");
        }
        if self.sync.batch_size == 0 || self.sync.batch_size > MAX_BATCH_SIZE {
            bail!(
                "Batch size must be between 1 and {} (got {})",
                MAX_BATCH_SIZE,
                self.sync.batch_size
            );
        }

        Ok(())
    }

    /// Sync loop tunables, with 0 meaning "off" where allowed
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_secs(self.sync.poll_interval_secs),
            batch_size: self.sync.batch_size,
            max_rows_per_cycle: (self.sync.max_rows_per_cycle > 0).then_some(self.sync.max_rows_per_cycle),
            drain_budget: positive_secs(self.sync.drain_budget_secs),
            call_timeout: positive_secs(self.sync.call_timeout_secs),
        }
    }
}

pub fn load_config_from_file(path: &Path) -> Result<ReplicatorConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("Failed to parse TOML config at {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn minimal_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DB_HOST", "db.internal"),
            ("DB_USER", "replicator"),
            ("DB_PASSWORD", "s3cret"),
            ("DB_DATABASE", "emalify"),
            ("SOURCE_TABLES", "batches, dlrs=delivery_reports"),
            ("BQ_PROJECT_ID", "rt-warehouse"),
            ("BQ_DATASET_ID", "emalify"),
        ]
    }

    #[test]
    fn parse_sample_config() {
        let mut tmp = NamedTempFile::new().unwrap();
        let contents = r#"
            [source]
            url = "mysql://replicator:pw@db.internal:3306/emalify"

            [destination]
            project_id = "rt-warehouse"
            dataset_id = "emalify"
            credentials_file = "/etc/replicator/key.json"

            [sync]
            poll_interval_secs = 600
            batch_size = 500
            drain_budget_secs = 0
            dead_letter_file = "/var/lib/replicator/dead.jsonl"

            [logging]
            log_file = "/var/log/replicator.log"

            [[tables]]
            source = "batches"

            [[tables]]
            source = "dlrs"
            destination = "delivery_reports"
            id_column = "dlr_id"
        "#;
        write!(tmp, "{}", contents).unwrap();

        let config = load_config_from_file(tmp.path()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.source.port, 3306);
        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.tables[0].id_column, "id");
        assert_eq!(config.tables[1].destination_table(), "delivery_reports");
        assert_eq!(config.tables[1].id_column, "dlr_id");

        let settings = config.settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(600));
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.max_rows_per_cycle, Some(10_000));
        assert_eq!(settings.drain_budget, None);
        assert_eq!(settings.call_timeout, Some(Duration::from_secs(300)));
        assert_eq!(
            config.logging.log_file.as_deref(),
            Some(Path::new("/var/log/replicator.log"))
        );
    }

    #[test]
    fn from_env_applies_defaults() {
        let config = ReplicatorConfig::from_lookup(env(&minimal_env())).unwrap();
        config.validate().unwrap();

        assert_eq!(config.source.host, "db.internal");
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.destination.credentials_file, None);
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.tables[0].destination_table(), "batches");
        assert_eq!(config.tables[1].source, "dlrs");
        assert_eq!(config.tables[1].destination_table(), "delivery_reports");
    }

    #[test]
    fn from_env_zero_disables_limits() {
        let mut vars = minimal_env();
        vars.extend([
            ("MAX_ROWS_PER_CYCLE", "0"),
            ("DRAIN_BUDGET_SECS", "0"),
            ("CALL_TIMEOUT_SECS", "0"),
            ("ID_COLUMN", "row_id"),
        ]);

        let config = ReplicatorConfig::from_lookup(env(&vars)).unwrap();
        let settings = config.settings();
        assert_eq!(settings.max_rows_per_cycle, None);
        assert_eq!(settings.drain_budget, None);
        assert_eq!(settings.call_timeout, None);
        assert!(config.tables.iter().all(|t| t.id_column == "row_id"));
    }

    #[test]
    fn from_env_rejects_missing_and_malformed_values() {
        let mut vars = minimal_env();
        vars.retain(|(k, _)| *k != "BQ_PROJECT_ID");
        let err = ReplicatorConfig::from_lookup(env(&vars)).unwrap_err();
        assert!(err.to_string().contains("BQ_PROJECT_ID"));

        let mut vars = minimal_env();
        vars.push(("BATCH_SIZE", "lots"));
        let err = ReplicatorConfig::from_lookup(env(&vars)).unwrap_err();
        assert!(err.to_string().contains("BATCH_SIZE"));
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let base = ReplicatorConfig::from_lookup(env(&minimal_env())).unwrap();

        let mut config = base.clone();
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.tables.push(TableMapping::new("batches"));
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.tables = vec![TableMapping::new("users; DROP TABLE users")];
        assert!(config.validate().is_err());

        let mut config = base;
        config.source.host.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_output_hides_password() {
        let config = ReplicatorConfig::from_lookup(env(&minimal_env())).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }
}
