use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use phishguard::analysis::ContentScanner;
use phishguard::api::{ApiState, api_routes};
use phishguard::classify::{ClassificationClient, connect_cache, spawn_sweeper};
use phishguard::config::{AppConfig, LoggingConfig};
use phishguard::mailbox::{ImapMailbox, SampleMailbox};
use phishguard::pipeline::{EventSink, JsonlSink, ScoringOrchestrator, run_once, spawn_poller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let _log_guard = init_tracing(&LoggingConfig::from_env());

    let config = AppConfig::from_env().context("Invalid configuration")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = %config.mode,
        blacklist = config.blacklist.len(),
        events = %config.event_log_path.display(),
        "phishguard starting"
    );

    let scanner = ContentScanner::new(&config.blacklist);
    let orchestrator = Arc::new(build_orchestrator(&config, scanner).await?);
    let sink: Arc<dyn EventSink> = Arc::new(JsonlSink::new(config.event_log_path.clone()));

    // ── Sample directory (one shot) ─────────────────────────────────────
    if let Some(dir) = &config.samples_dir {
        let mailbox = SampleMailbox::new(dir.clone());
        let written = run_once(&mailbox, &orchestrator, sink.as_ref())
            .await
            .with_context(|| format!("Failed to read samples from {}", dir.display()))?;
        info!(count = written, dir = %dir.display(), "Sample run complete");
    }

    // ── IMAP poller ─────────────────────────────────────────────────────
    let poller = config.imap.clone().map(|imap| {
        info!(host = %imap.host, port = imap.port, "IMAP polling enabled");
        spawn_poller(
            Arc::new(ImapMailbox::new(imap)),
            Arc::clone(&orchestrator),
            Arc::clone(&sink),
            config.poll_interval,
        )
    });

    // ── HTTP API ────────────────────────────────────────────────────────
    if let Some(port) = config.api_port {
        let app = api_routes(ApiState {
            orchestrator: Arc::clone(&orchestrator),
            sink: Some(Arc::clone(&sink)),
        });
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("Failed to bind API port {port}"))?;
        info!(port, "API server started");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("API server failed")?;
    } else if poller.is_some() {
        shutdown_signal().await;
    } else if config.samples_dir.is_none() {
        warn!("Nothing to do: set SAMPLES_DIR, IMAP_HOST or API_PORT");
    }

    if let Some((handle, shutdown)) = poller {
        shutdown.store(true, Ordering::Relaxed);
        handle.abort();
    }
    info!("phishguard stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "phishguard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

async fn build_orchestrator(
    config: &AppConfig,
    scanner: ContentScanner,
) -> anyhow::Result<ScoringOrchestrator> {
    if !config.mode.classification_enabled() {
        return Ok(ScoringOrchestrator::degraded(scanner));
    }

    let cache = connect_cache(&config.cache).await;
    if let Some(cache) = &cache {
        spawn_sweeper(Arc::clone(cache), config.cache.sweep_interval);
    }

    let client =
        ClassificationClient::from_config(config.llm.as_ref(), cache, config.client.clone())
            .context("Failed to create classification client")?;
    Ok(ScoringOrchestrator::new(
        config.mode,
        Some(Arc::new(client)),
        scanner,
    )?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
