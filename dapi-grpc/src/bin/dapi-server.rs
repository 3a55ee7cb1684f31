use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dapi_grpc::backend::{
    CoreBackend, CoreRpcClient, DriveClient, MemoryCore, MemoryPlatform, PlatformBackend,
};
use dapi_grpc::{DapiConfig, DapiServer};
use slog::{Drain, Level, Logger, o};

#[derive(Parser)]
#[command(name = "dapi-server", about = "Dash DAPI gRPC server", version)]
struct Cli {
    /// Path to a TOML config file (defaults apply when omitted)
    #[arg(long, short, env = "DAPI_CONFIG")]
    config: Option<PathBuf>,

    /// Serve from in-memory backends instead of Core and Drive
    #[arg(long)]
    dev: bool,

    /// In dev mode, mine a block every N seconds
    #[arg(long, requires = "dev")]
    dev_block_interval: Option<u64>,
}

fn create_logger() -> Logger {
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|env_str| Level::from_str(&env_str).ok())
        .unwrap_or(Level::Info);

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .build()
        .fuse()
        .filter_level(log_level)
        .fuse();

    Logger::root(drain, o!("app" => "dapi-server"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let logger = create_logger();

    let config = match &cli.config {
        Some(path) => DapiConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let config = DapiConfig::default();
            config.validate()?;
            config
        }
    };

    let mut tasks = Vec::new();
    let (core, platform): (Arc<dyn CoreBackend>, Arc<dyn PlatformBackend>) = if cli.dev {
        slog::warn!(logger, "Serving from in-memory backends"; "network" => %config.server.network);
        let core = Arc::new(MemoryCore::new(config.server.network));
        if let Some(secs) = cli.dev_block_interval {
            let miner = Arc::clone(&core);
            let miner_logger = logger.clone();
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let block = miner.mine_block();
                    slog::info!(miner_logger, "Mined block";
                        "height" => block.height,
                        "transactions" => block.transactions.len());
                }
            }));
        }
        (core, Arc::new(MemoryPlatform::new()))
    } else {
        let core = Arc::new(
            CoreRpcClient::new(&config.core, logger.new(o!("backend" => "core")))
                .context("Failed to create Core RPC client")?,
        );
        tasks.push(core.spawn_watcher(Duration::from_millis(config.core.poll_interval_ms)));
        match &config.core.zmq_url {
            Some(url) => tasks.push(core.spawn_zmq_listener(url)),
            None => slog::warn!(logger,
                "No core.zmq_url configured, live subscriptions will miss mempool transactions"),
        }
        let drive = DriveClient::new(&config.drive, logger.new(o!("backend" => "drive")))
            .context("Failed to create Drive client")?;
        (core, Arc::new(drive))
    };

    let server = DapiServer::new(config, core, platform, logger.clone());
    let shutdown_logger = logger.clone();
    server
        .serve_with_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                slog::error!(shutdown_logger, "Failed to listen for shutdown signal"; "error" => %e);
                std::future::pending::<()>().await;
            }
            slog::info!(shutdown_logger, "Shutdown signal received");
        })
        .await
        .context("gRPC server failed")?;

    for task in tasks {
        task.abort();
    }
    Ok(())
}
