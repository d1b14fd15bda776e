mod constants;
mod routes;

use clap::Parser;
use ledger_core::{ChainLedger, LedgerConfig, LedgerStore, MemoryStore};
use ledger_storage::SledStore;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use constants::{DEFAULT_DATA_DIR, DEFAULT_LISTEN, DEFAULT_LOG_FILTER};
use routes::AppState;

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Data directory for sled
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Keep ledgers in memory only
    #[arg(long)]
    in_memory: bool,

    /// TOML file with ledger settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Leading zero hex digits required per block
    #[arg(long)]
    difficulty: Option<u32>,

    /// Give up mining a block after this many milliseconds
    #[arg(long)]
    mining_timeout_ms: Option<u64>,

    /// Search nonces on all cores
    #[arg(long)]
    parallel: bool,

    /// Also validate the genesis block on its own
    #[arg(long)]
    validate_genesis: bool,
}

impl Args {
    fn ledger_config(&self) -> anyhow::Result<LedgerConfig> {
        let mut config = match &self.config {
            Some(path) => LedgerConfig::load(path)?,
            None => LedgerConfig::default(),
        };
        if let Some(difficulty) = self.difficulty {
            config.difficulty = difficulty;
        }
        if let Some(ms) = self.mining_timeout_ms {
            config.mining_timeout_ms = Some(ms);
        }
        config.parallel_mining |= self.parallel;
        config.validate_genesis |= self.validate_genesis;
        Ok(config.check()?)
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {err}");
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = args.ledger_config()?;
    info!(
        "difficulty {}, at most {} transactions per block, timeout {:?} ms",
        config.difficulty, config.max_transactions_per_block, config.mining_timeout_ms
    );

    let store: Arc<dyn LedgerStore> = if args.in_memory {
        info!("using in-memory ledger store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SledStore::open(&args.data_dir)?)
    };
    let state = AppState {
        chain: ChainLedger::new(store, config),
    };

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = args.listen.parse()?;
    info!("ledger-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
