mod file_config;

pub use file_config::{BackoffConfig, ElasticsearchConfig, FileConfig, PostgresConfig};

use crate::retry::BackoffPolicy;
use crate::source::PgSettings;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INDEX_NAME: &str = "movies";
pub const DEFAULT_INDEX_SCHEMA_PATH: &str = "es_schema.json";
pub const DEFAULT_STATE_PATH: &str = "state_storage.json";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_LOOP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_ES_URL: &str = "http://127.0.0.1:9200";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BACKOFF_START_SECS: f64 = 0.1;
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_BACKOFF_BORDER_SECS: f64 = 10.0;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_host: String,
    pub db_port: u16,
    pub db_name: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub es_url: String,
    pub request_timeout_secs: u64,
    pub index_name: String,
    pub index_schema_path: PathBuf,
    pub state_path: PathBuf,
    pub batch_size: usize,
    pub loop_timeout_secs: u64,
    pub backoff_start_secs: f64,
    pub backoff_factor: f64,
    pub backoff_border_secs: f64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_host: DEFAULT_DB_HOST.to_string(),
            db_port: DEFAULT_DB_PORT,
            db_name: None,
            db_user: None,
            db_password: None,
            es_url: DEFAULT_ES_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            index_name: DEFAULT_INDEX_NAME.to_string(),
            index_schema_path: PathBuf::from(DEFAULT_INDEX_SCHEMA_PATH),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            loop_timeout_secs: DEFAULT_LOOP_TIMEOUT_SECS,
            backoff_start_secs: DEFAULT_BACKOFF_START_SECS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            backoff_border_secs: DEFAULT_BACKOFF_BORDER_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub postgres: PgSettings,
    pub elasticsearch: ElasticsearchSettings,
    pub index_name: String,
    pub index_schema_path: PathBuf,
    pub state_path: PathBuf,
    pub batch_size: usize,
    /// Pause between two cycles.
    pub loop_timeout: Duration,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElasticsearchSettings {
    pub url: String,
    pub request_timeout: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let pg_file = file.postgres.unwrap_or_default();
        let dbname = pg_file
            .dbname
            .or_else(|| cli.db_name.clone())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("Database name must be specified via --db-name, DB_NAME or in config file")
            })?;
        let user = pg_file
            .user
            .or_else(|| cli.db_user.clone())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("Database user must be specified via --db-user, DB_USER or in config file")
            })?;
        let postgres = PgSettings {
            host: pg_file.host.unwrap_or_else(|| cli.db_host.clone()),
            port: pg_file.port.unwrap_or(cli.db_port),
            dbname,
            user,
            password: pg_file.password.or_else(|| cli.db_password.clone()),
            connect_timeout: Duration::from_secs(
                pg_file
                    .connect_timeout_secs
                    .unwrap_or(DEFAULT_DB_CONNECT_TIMEOUT_SECS),
            ),
        };

        let es_file = file.elasticsearch.unwrap_or_default();
        let elasticsearch = ElasticsearchSettings {
            url: es_file.url.unwrap_or_else(|| cli.es_url.clone()),
            request_timeout: Duration::from_secs(
                es_file
                    .request_timeout_secs
                    .unwrap_or(cli.request_timeout_secs),
            ),
        };

        let index_name = file.index_name.unwrap_or_else(|| cli.index_name.clone());
        if index_name.is_empty() {
            bail!("index_name must not be empty");
        }
        let index_schema_path = file
            .index_schema_path
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.index_schema_path.clone());
        let state_path = file
            .state_path
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.state_path.clone());

        let batch_size = file.batch_size.unwrap_or(cli.batch_size);
        if batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }
        let loop_timeout = Duration::from_secs(file.loop_timeout_secs.unwrap_or(cli.loop_timeout_secs));

        let backoff_file = file.backoff.unwrap_or_default();
        let backoff = resolve_backoff(
            backoff_file.start_secs.unwrap_or(cli.backoff_start_secs),
            backoff_file.factor.unwrap_or(cli.backoff_factor),
            backoff_file.border_secs.unwrap_or(cli.backoff_border_secs),
        )?;

        Ok(Self {
            postgres,
            elasticsearch,
            index_name,
            index_schema_path,
            state_path,
            batch_size,
            loop_timeout,
            backoff,
        })
    }
}

fn resolve_backoff(start_secs: f64, factor: f64, border_secs: f64) -> Result<BackoffPolicy> {
    if !start_secs.is_finite() || start_secs <= 0.0 {
        bail!("Backoff start must be a positive number of seconds, got {}", start_secs);
    }
    if !factor.is_finite() || factor < 1.0 {
        bail!("Backoff factor must be at least 1, got {}", factor);
    }
    if !border_secs.is_finite() || border_secs < start_secs {
        bail!(
            "Backoff border ({}s) must not be lower than backoff start ({}s)",
            border_secs,
            start_secs
        );
    }
    Ok(BackoffPolicy::new(
        Duration::from_secs_f64(start_secs),
        factor,
        Duration::from_secs_f64(border_secs),
    ))
}
