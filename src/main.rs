use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use catalog_search_sync::config::{self, AppConfig, CliConfig, FileConfig};
use catalog_search_sync::index::load_index_schema;
use catalog_search_sync::sync::run_loop;
use catalog_search_sync::{
    CycleReport, ElasticsearchClient, JsonFileWatermarkStore, PgCatalogSource, SyncSettings,
    Synchronizer,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[clap(version, about = "Keeps the movies search index in sync with the catalog database")]
struct CliArgs {
    /// Path to a TOML config file. Its values override command line arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Catalog database host.
    #[clap(long, env = "DB_HOST", default_value = config::DEFAULT_DB_HOST)]
    pub db_host: String,

    /// Catalog database port.
    #[clap(long, env = "DB_PORT", default_value_t = config::DEFAULT_DB_PORT)]
    pub db_port: u16,

    /// Catalog database name.
    #[clap(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Catalog database user.
    #[clap(long, env = "DB_USER")]
    pub db_user: Option<String>,

    /// Catalog database password.
    #[clap(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Elasticsearch base URL.
    #[clap(long, env = "ES_URL", default_value = config::DEFAULT_ES_URL)]
    pub es_url: String,

    /// Timeout in seconds for Elasticsearch requests.
    #[clap(long, default_value_t = config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Name of the destination index.
    #[clap(long, default_value = config::DEFAULT_INDEX_NAME)]
    pub index_name: String,

    /// JSON file with the index settings and mappings.
    #[clap(long, value_parser = parse_path, default_value = config::DEFAULT_INDEX_SCHEMA_PATH)]
    pub index_schema: PathBuf,

    /// JSON file holding the sync watermark.
    #[clap(long, value_parser = parse_path, default_value = config::DEFAULT_STATE_PATH)]
    pub state_path: PathBuf,

    /// Number of documents per page and bulk request.
    #[clap(long, default_value_t = config::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Seconds to wait between two sync cycles.
    #[clap(long, env = "LOOP_TIMEOUT", default_value_t = config::DEFAULT_LOOP_TIMEOUT_SECS)]
    pub loop_timeout: u64,

    /// Delay in seconds before the first retry of an unreachable service.
    #[clap(long, default_value_t = config::DEFAULT_BACKOFF_START_SECS)]
    pub backoff_start: f64,

    /// Multiplier applied to the retry delay after each attempt.
    #[clap(long, default_value_t = config::DEFAULT_BACKOFF_FACTOR)]
    pub backoff_factor: f64,

    /// Maximum retry delay in seconds.
    #[clap(long, default_value_t = config::DEFAULT_BACKOFF_BORDER_SECS)]
    pub backoff_border: f64,

    /// Run a single cycle and exit.
    #[clap(long)]
    pub once: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_host: self.db_host.clone(),
            db_port: self.db_port,
            db_name: self.db_name.clone(),
            db_user: self.db_user.clone(),
            db_password: self.db_password.clone(),
            es_url: self.es_url.clone(),
            request_timeout_secs: self.request_timeout_secs,
            index_name: self.index_name.clone(),
            index_schema_path: self.index_schema.clone(),
            state_path: self.state_path.clone(),
            batch_size: self.batch_size,
            loop_timeout_secs: self.loop_timeout,
            backoff_start_secs: self.backoff_start,
            backoff_factor: self.backoff_factor,
            backoff_border_secs: self.backoff_border,
        }
    }
}

/// One cycle with freshly acquired connections, released on return.
async fn run_cycle(config: &AppConfig, index_schema: &serde_json::Value) -> Result<CycleReport> {
    let index = ElasticsearchClient::connect(
        &config.elasticsearch.url,
        config.elasticsearch.request_timeout,
        config.backoff.clone(),
    )
    .await?;
    let source = PgCatalogSource::connect(config.postgres.clone(), config.backoff.clone()).await?;
    let store = JsonFileWatermarkStore::new(&config.state_path);

    let settings = SyncSettings {
        index_name: config.index_name.clone(),
        batch_size: config.batch_size,
        index_schema: index_schema.clone(),
    };
    let mut synchronizer = Synchronizer::new(source, index, store, settings);
    Ok(synchronizer.run_cycle().await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    info!("catalog-sync v{}", env!("CARGO_PKG_VERSION"));

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let index_schema = load_index_schema(&config.index_schema_path)?;
    info!(
        "Syncing {}@{}:{}/{} into {} index {:?} every {:?}, state in {:?}",
        config.postgres.user,
        config.postgres.host,
        config.postgres.port,
        config.postgres.dbname,
        config.elasticsearch.url,
        config.index_name,
        config.loop_timeout,
        config.state_path
    );

    // One listener for the whole process, so no Ctrl-C is missed between cycles
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let config = &config;
    let index_schema = &index_schema;
    run_loop(config.loop_timeout, cli_args.once, shutdown, move || {
        run_cycle(config, index_schema)
    })
    .await?;
    Ok(())
}
