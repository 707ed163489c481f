use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::WrapErr;
use ouros_relay::{SessionStore, spawn_reaper};
use ouros_relay_server::{AppState, Args, serve};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    tracing_subscriber::registry()
        .with(
            fmt_layer
                .with_timer(tracing_subscriber::fmt::time::SystemTime)
                .with_filter(filter),
        )
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    init_tracing();

    let args = Args::parse();
    let config = args.relay_config();
    tracing::info!(
        bind = %args.bind,
        idle_timeout_secs = config.idle_timeout.as_secs(),
        reap_interval_secs = config.reap_interval.as_secs(),
        max_sessions = config.max_sessions,
        "starting ouros-relay"
    );

    let store = Arc::new(SessionStore::with_ouros(config));
    let shutdown = CancellationToken::new();
    let reaper = spawn_reaper(Arc::clone(&store), shutdown.clone());

    let listener = TcpListener::bind(args.bind)
        .await
        .wrap_err_with(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down");
            shutdown.cancel();
        }
    });

    serve(listener, AppState::new(store, shutdown.clone()))
        .await
        .wrap_err("server failed")?;
    shutdown.cancel();
    reaper.await.wrap_err("reaper task panicked")?;
    Ok(())
}
