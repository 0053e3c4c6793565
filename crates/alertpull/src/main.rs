//! Alertpull - pulls status, silences and alert groups from Alertmanager upstreams

use std::sync::Arc;

use alertpull_core::{PulledSnapshot, ResponseCache, UpstreamManager, spawn_cleanup_task};
use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, ConfigManager, LoggingConfig};

/// Alertpull - periodic puller for Alertmanager-compatible upstreams
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "ALERTPULL_CONFIG", default_value = "config/alertpull.toml")]
    config: String,

    /// Log level, overrides the config file
    #[arg(long, env = "ALERTPULL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Run a single pull round and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging);

    info!("Starting alertpull v{}", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = config.metrics.listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics exporter started on http://{}/metrics", addr);
    }

    let cancel = CancellationToken::new();
    let cache = Arc::new(ResponseCache::new());
    let cleanup = spawn_cleanup_task(cache.clone(), config.pull.cache_sweep(), cancel.clone());

    let config_manager = ConfigManager::new(config.clone(), args.config.clone());
    let manager = UpstreamManager::new(Arc::new(config_manager.clone()), cache)
        .with_reprobe_after(config.pull.reprobe_after);

    if manager.upstream_count() == 0 {
        warn!("No enabled upstreams configured");
    }
    for upstream in manager.list() {
        info!(
            "Upstream {}: timeout {}s, cache ttl {}s, {} custom headers",
            upstream.name,
            upstream.timeout_secs,
            upstream.cache_ttl_secs,
            upstream.headers.len()
        );
    }

    tokio::spawn(shutdown_signal(cancel.clone()));

    if args.once {
        pull_round(&manager, &cancel).await;
    } else {
        run(&manager, &config_manager, &config, &cancel).await;
    }

    cancel.cancel();
    cleanup.await.context("Cache cleanup task panicked")?;

    info!("Stopped");
    Ok(())
}

/// Pull every upstream each interval until cancelled
async fn run(
    manager: &UpstreamManager,
    config_manager: &ConfigManager,
    config: &Config,
    cancel: &CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.pull.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        "Pulling {} upstreams every {:?}",
        manager.upstream_count(),
        config.pull.interval()
    );

    let mut reload = ReloadSignal::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => pull_round(manager, cancel).await,
            _ = reload.recv() => {
                match config_manager.reload_async().await {
                    Ok(()) => manager.reload(),
                    Err(e) => error!("Failed to reload configuration: {:#}", e),
                }
            }
        }
    }
}

/// One concurrent pull of every upstream, each snapshot printed as a JSON line
async fn pull_round(manager: &UpstreamManager, cancel: &CancellationToken) {
    for snapshot in manager.pull_all(cancel).await {
        emit(&snapshot);
    }
}

fn emit(snapshot: &PulledSnapshot) {
    match serde_json::to_string(snapshot) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to serialize snapshot of {}: {}", snapshot.upstream, e),
    }
}

/// Initialize logging; RUST_LOG takes precedence over the configured level
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Snapshots own stdout
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Cancel everything on CTRL+C
async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for CTRL+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
    cancel.cancel();
}

/// Config reload trigger: SIGHUP on unix, never fires elsewhere
struct ReloadSignal {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

impl ReloadSignal {
    #[cfg(unix)]
    fn new() -> Self {
        use tokio::signal::unix::{SignalKind, signal};

        let signal = signal(SignalKind::hangup())
            .inspect_err(|e| warn!("Config reload on SIGHUP unavailable: {}", e))
            .ok();
        Self { signal }
    }

    #[cfg(not(unix))]
    fn new() -> Self {
        Self {}
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(signal) = self.signal.as_mut() {
            if signal.recv().await.is_some() {
                info!("SIGHUP received, reloading configuration");
                return;
            }
            self.signal = None;
        }
        std::future::pending::<()>().await
    }
}
