mod cli;
mod config_file;
mod socks5_server;

use clap::Parser;
use cli::{Cli, Command};
use pool_core::sources::build_registry;
use pool_core::{Dispatcher, PoolStore};
use socks5_server::Socks5Server;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "poold=debug,pool_core=debug" } else { "poold=info,pool_core=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    tracing::info!(version = VERSION, "poold starting");

    if let Some(Command::Update) = cli.command {
        println!("poold {VERSION}: up to date");
        return Ok(());
    }
    if !cli.disable_update_check {
        tracing::debug!("update check skipped (out of scope)");
    }

    let config = config_file::load_or_materialize(&cli.config).await?;
    let store = Arc::new(PoolStore::load(&cli.alive_data_path).await?);
    let registry = Arc::new(build_registry(&config));
    let notify = Arc::new(Notify::new());

    let dispatcher = Arc::new(Dispatcher::new(store.clone(), config.liveness.check_interval()));
    let server = Socks5Server::new(&config.listener, dispatcher)?;

    tokio::spawn(pool_core::scheduler::run_ingest_loop(
        store.clone(),
        registry,
        config.liveness.clone(),
        config.geo.clone(),
        config.liveness.min_size,
        notify.clone(),
    ));
    tokio::spawn(pool_core::scheduler::run_recheck_loop(
        store.clone(),
        config.liveness.clone(),
        config.liveness.min_size,
        notify,
    ));
    tokio::spawn(pool_core::scheduler::run_snapshot_loop(store.clone()));

    tokio::select! {
        res = server.run() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "socks5 server exited with fatal error");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            if let Err(e) = store.save().await {
                tracing::warn!(error = %e, "final snapshot save failed");
            }
        }
    }

    Ok(())
}
