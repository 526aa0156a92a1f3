use clap::Parser;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::network::{DEFAULT_API_PORT, DEFAULT_JOIN_TOKEN};
use pkg_constants::paths::{DEFAULT_SERVER_CONFIG, DEFAULT_SERVER_DATA_DIR};
use pkg_controllers::ControllerConfig;
use pkg_types::config::{ServerConfigFile, load_config_file};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quotapool-server", about = "Resource pool allocation server")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Bearer token required by the API
    #[arg(long)]
    token: Option<String>,

    /// Seconds between full controller resyncs
    #[arg(long)]
    resync_interval_secs: Option<u64>,

    /// Worker tasks per controller
    #[arg(long)]
    workers: Option<usize>,

    /// Attempts for each conflicting status write
    #[arg(long)]
    status_retries: Option<u32>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&cli.config)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json || file_cfg.log_json.unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_API_PORT);
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_SERVER_DATA_DIR.to_string());
    let token = cli
        .token
        .or(file_cfg.token)
        .unwrap_or_else(|| DEFAULT_JOIN_TOKEN.to_string());

    let mut controllers = ControllerConfig::default();
    if let Some(secs) = cli.resync_interval_secs.or(file_cfg.resync_interval_secs) {
        controllers.resync_interval = Duration::from_secs(secs.max(1));
    }
    if let Some(workers) = cli.workers.or(file_cfg.workers) {
        controllers.workers = workers.max(1);
    }
    if let Some(retries) = cli.status_retries.or(file_cfg.status_retries) {
        controllers.status_retries = retries.max(1);
    }

    info!("Starting quotapool-server");
    info!("  Port:      {}", port);
    info!("  Data dir:  {}", data_dir);
    info!("  Token:     {}***", token.chars().take(4).collect::<String>());
    info!(
        "  Controllers: resync={:?} workers={} retries={}",
        controllers.resync_interval, controllers.workers, controllers.status_retries
    );

    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        data_dir,
        join_token: token,
        controllers,
    };

    start_server(config).await?;

    Ok(())
}
