// notifier: delivers stored articles to recipient chat channels.

use bus_store::ArticleStore;
use notifier::config;
use notifier::dispatch::Dispatcher;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "notifier starting");

    let cfg = match config::load_config() {
        Ok(cfg) => {
            let channels: usize = cfg.tenants.iter().map(|t| t.channels.len()).sum();
            info!(
                tenants = cfg.tenants.len(),
                channels,
                tick_s = cfg.dispatch.tick_secs,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let store = match ArticleStore::open(&cfg.dispatch.db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("FATAL: failed to open article store: {e}");
            std::process::exit(1);
        }
    };

    let dispatcher = Dispatcher::new(cfg, store);

    // The loop checks this between ticks, so in-flight posts always finish
    // before exit.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await;
    info!("notifier shut down");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        () = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        () = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
