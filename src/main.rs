use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleetmap::expiration;
use fleetmap::follower;
use fleetmap::metrics::{init_metrics, refresh_loop};
use fleetmap::server::Server;
use fleetmap::socket_server::SocketServer;

#[derive(Parser, Debug)]
#[command(name = "fleetmap", version, about = "In-memory geospatial database")]
struct Args {
    /// Interface to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 9851)]
    port: u16,

    /// Data directory (log + config)
    #[arg(short, long, default_value = "data")]
    data: PathBuf,

    /// Prometheus exposition address, e.g. 127.0.0.1:4321
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), data = ?args.data, "starting");
    let server = Server::open(&args.data)?;

    if let Some(addr) = args.metrics_addr {
        init_metrics(addr)?;
        tokio::spawn(refresh_loop(server.clone()));
    }

    tokio::spawn(expiration::run(server.clone()));

    // deferred fsync: appends hit the page cache synchronously, the disk
    // once a second
    {
        let server = server.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                if let Err(e) = server.aof.lock().sync() {
                    error!(error = %e, "log fsync failed");
                }
            }
        });
    }

    if server.config.read().following() {
        let generation = server.follow_generation.load(Ordering::SeqCst);
        tokio::spawn(follower::run(server.clone(), generation));
    }

    let listener = SocketServer::bind(&args.host, args.port).await?;
    tokio::select! {
        _ = listener.accept_loop(server.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            server.aof.lock().sync().ok();
        }
    }
    Ok(())
}
