// pulsecheck server: monitoring engine plus its HTTP/WebSocket surface.
//
// Startup order matters: store first (fatal on failure), then the bus and
// probers, then the dispatcher/registry/scheduler wired around them, and the
// axum server last. Shutdown cascades the other way.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pulsecheck::api::{self, AppState};
use pulsecheck::browser_probe::{BrowserProber, BrowserSupervisor};
use pulsecheck::config::EngineConfig;
use pulsecheck::dispatcher::ProbeDispatcher;
use pulsecheck::http_probe::HttpProber;
use pulsecheck::monitor_events::MonitorEventBus;
use pulsecheck::registry::RegistryService;
use pulsecheck::scheduler::Scheduler;
use pulsecheck::url_store::UrlStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env().context("configuration error")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(config.log_level())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        port = config.port(),
        production = config.is_production(),
        "starting pulsecheck"
    );

    let store = UrlStore::open(config.database_url())
        .await
        .context("storage initialization failed")?;

    let bus = MonitorEventBus::default();
    let http_prober = HttpProber::new().context("failed to build HTTP prober")?;
    let supervisor = BrowserSupervisor::new();
    let browser_prober =
        BrowserProber::new(supervisor.clone(), config.screenshot_dir().to_path_buf());

    let dispatcher = ProbeDispatcher::new(
        store.clone(),
        bus.clone(),
        http_prober,
        browser_prober,
        config.probe_deadline(),
    );

    let registry = RegistryService::new(
        store.clone(),
        Arc::clone(&dispatcher),
        bus.clone(),
        config.is_production(),
    );

    let scheduler = Scheduler::new(store.clone(), Arc::clone(&dispatcher), config.check_interval());
    scheduler.start().await;

    let state = AppState {
        registry,
        store: store.clone(),
        scheduler: Arc::clone(&scheduler),
        bus: bus.clone(),
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };
    let app = api::build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        error!(error = %e, "server error");
    }

    // Cascade: scheduler stops ticking and drains, then the browser and bus.
    info!("shutting down");
    scheduler.stop().await;
    supervisor.shutdown().await;
    bus.shutdown();
    store.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
