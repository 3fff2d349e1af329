//! HTTP server entry point: opens the admin facade, starts the background
//! sweepers the startup sequence calls for (spec §6 -- TTL, changefeed
//! retention, tx timeout), serves the facade over HTTP, and drains
//! in-flight transactions on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use themis_admin::router::Router;
use themis_admin::server::Server;
use themis_admin::AdminFacade;
use themis_core::config::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "themis-server", about = "HTTP server for the storage/query engine")]
struct Args {
    /// Directory the KV engine persists to.
    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Address to bind the HTTP listener to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = EngineConfig::default();
    config.data_dir = args.data_dir.into();
    config.cte_spill_dir = config.data_dir.join("cte-spill");

    let facade = Arc::new(AdminFacade::open(config.clone())?);
    tracing::info!(data_dir = %config.data_dir.display(), "admin facade opened");

    spawn_sweeper(config.ttl_sweep_interval_ms, "ttl", {
        let facade = facade.clone();
        move || {
            let facade = facade.clone();
            async move {
                match facade.sweep_ttl(now_ms(), 1000) {
                    Ok(expired) if !expired.is_empty() => {
                        tracing::info!(count = expired.len(), "ttl sweeper expired entities")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "ttl sweep failed"),
                }
            }
        }
    });

    spawn_sweeper(config.changefeed_sweep_interval_ms, "changefeed-retention", {
        let facade = facade.clone();
        move || {
            let facade = facade.clone();
            async move {
                if let Err(e) = facade.sweep_changefeed_retention() {
                    tracing::warn!(error = %e, "changefeed retention sweep failed");
                }
            }
        }
    });

    spawn_sweeper(config.tx_sweep_interval_ms, "tx-timeout", {
        let facade = facade.clone();
        move || {
            let facade = facade.clone();
            async move {
                let expired = facade.sweep_expired_transactions(now_ms());
                if expired > 0 {
                    tracing::info!(count = expired, "tx-timeout sweeper rolled back expired transactions");
                }
            }
        }
    });

    let router = Router::new(facade.clone());
    let server = Server::new(args.addr, router);
    let serve = tokio::spawn(server.serve());

    tokio::select! {
        result = serve => {
            if let Ok(Err(e)) = result {
                tracing::error!(error = %e, "server loop exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    facade.shutdown()?;
    tracing::info!("admin facade shut down cleanly");
    Ok(())
}

fn spawn_sweeper<F, Fut>(interval_ms: u64, name: &'static str, mut f: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            ticker.tick().await;
            tracing::trace!(sweeper = name, "tick");
            f().await;
        }
    });
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
