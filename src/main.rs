//! Searchd server binary.
//!
//! Loads configuration, initializes tracing, and serves the REST API with
//! the local data node bootstrapped into the cluster.

use clap::Parser;
use searchd::config::Config;
use searchd::rest;
use searchd::SearchCoordinator;

#[derive(Parser)]
#[command(name = "searchd", version, about = "Sharded search coordinator")]
struct Args {
    /// Path to a config file (defaults to config.toml + SEARCHD_* env)
    #[arg(long)]
    config: Option<String>,

    /// Listen address override, host:port
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(listen) = &args.listen {
        let (host, port) = listen
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("listen address must be host:port"))?;
        config.http.host = host.to_string();
        config.http.port = port.parse()?;
    }

    init_tracing(&config);

    let coordinator = SearchCoordinator::new(config.clone());
    tracing::info!(
        node = coordinator.local_node_id(),
        port = config.http.port,
        "searchd_starting"
    );

    rest::start_http_server(coordinator, &config.http).await
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
