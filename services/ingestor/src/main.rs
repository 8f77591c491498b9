// ingestor: polls RSS/Atom feeds and persists canonical articles.

use bus_store::ArticleStore;
use ingestor::config;
use ingestor::cycle::Ingestor;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "ingestor starting");

    let cfg = match config::load_config() {
        Ok(cfg) => {
            info!(
                sources = cfg.sources.len(),
                interval_s = cfg.ingest.poll_interval_secs,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let store = match ArticleStore::open(&cfg.ingest.db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("FATAL: failed to open article store: {e}");
            std::process::exit(1);
        }
    };

    let ingestor = match Ingestor::new(cfg, store) {
        Ok(ingestor) => ingestor,
        Err(e) => {
            eprintln!("FATAL: failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };

    // The loop checks this between cycles, so in-flight work always
    // finishes before exit.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    ingestor.run(shutdown_rx).await;
    info!("ingestor shut down");
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
