//! Prescriptivism Game Server
//!
//! Authoritative server for a two-player session. Binds a TCP listener,
//! hands accepted sockets to the network layer, and exits when the game is
//! abandoned or the process is interrupted.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use prescriptivism::network::{GameServer, ServerConfig};
use prescriptivism::{DEFAULT_PORT, VERSION};

#[derive(Debug, Parser)]
#[command(name = "prescriptivism-server", version, about)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Password clients must present on login.
    #[arg(long, default_value = "")]
    pwd: String,

    /// RNG seed; defaults to the wall clock for a fresh deal each run.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::try_parse().unwrap_or_else(|err| {
        // Exit code 1 on bad arguments, not clap's default 2.
        let _ = err.print();
        std::process::exit(1);
    });
    info!("Prescriptivism Server v{VERSION}");

    let seed = match args.seed {
        Some(seed) => seed,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before the epoch")?
            .as_nanos() as u64,
    };

    let config = ServerConfig {
        bind_addr: SocketAddr::from(([0, 0, 0, 0], args.port)),
        password: args.pwd,
        seed,
        ..ServerConfig::default()
    };
    let server = GameServer::bind(config).await.context("failed to bind listener")?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = shutdown.send(());
        }
    });

    server.run().await.context("server failed")?;
    Ok(())
}
