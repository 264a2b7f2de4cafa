//! Odoo SaaS control plane: tenant lifecycle, customer accounts, billing
//! webhooks, and background jobs behind one HTTP API.
//!
//! Main entry point that wires every subsystem and starts the server.

mod seed;

use clap::Parser;
use saas_api::{ApiServer, AppState};
use saas_core::config::AppConfig;
use saas_jobs::{TracingNotifier, WorkerPool};
use saas_ops::provisioner::{HttpOdooProvisioner, InMemoryProvisioner, OdooProvisioner};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "saas-control-plane")]
#[command(about = "Control plane for hosted multi-tenant Odoo")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "SAAS_CONTROL__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "SAAS_CONTROL__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Number of job workers (overrides config)
    #[arg(long, env = "SAAS_CONTROL__JOBS__WORKERS")]
    workers: Option<usize>,

    /// Use the in-memory provisioner instead of the Odoo service
    #[arg(long, env = "SAAS_CONTROL__ODOO__DEV_MODE", default_value_t = false)]
    dev: bool,

    /// Seed demo plans, an admin, and a customer on startup
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

/// Run `task` every `period`, skipping the immediate first tick.
fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, task: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            tracing::debug!(task = name, "Running periodic task");
            task().await;
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "saas_control_plane=info,saas_api=info,saas_jobs=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Control plane starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(workers) = cli.workers {
        config.jobs.workers = workers;
    }
    if cli.dev {
        config.odoo.dev_mode = true;
    }

    if config.uses_default_jwt_secret() {
        warn!("Using the built-in development JWT secret; set SAAS_CONTROL__AUTH__JWT_SECRET");
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        workers = config.jobs.workers,
        dev_mode = config.odoo.dev_mode,
        "Configuration loaded"
    );

    let provisioner: Arc<dyn OdooProvisioner> = if config.odoo.dev_mode {
        info!("Using in-memory provisioner");
        Arc::new(InMemoryProvisioner::new())
    } else {
        Arc::new(HttpOdooProvisioner::new(&config.odoo)?)
    };

    let workers = config.jobs.workers;
    let collect_every = Duration::from_secs(config.quota.collect_interval_secs);
    let cleanup_every = Duration::from_secs(config.backup.cleanup_interval_secs);

    let state = AppState::new(config, provisioner, Arc::new(TracingNotifier))?;

    if cli.seed_demo {
        seed::seed_demo(&state)?;
    }

    let mut pool = WorkerPool::new(state.executor.clone());
    pool.start(workers);

    let maintenance = state.maintenance.clone();
    spawn_periodic("collect_usage", collect_every, move || {
        let maintenance = maintenance.clone();
        async move {
            maintenance.collect_usage().await;
        }
    });
    let maintenance = state.maintenance.clone();
    spawn_periodic("cleanup_backups", cleanup_every, move || {
        let maintenance = maintenance.clone();
        async move {
            maintenance.cleanup_backups().await;
        }
    });
    let maintenance = state.maintenance.clone();
    spawn_periodic("purge", Duration::from_secs(300), move || {
        let maintenance = maintenance.clone();
        async move {
            maintenance.purge();
        }
    });

    let api_server = ApiServer::new(state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Control plane is ready to serve traffic");

    let served = api_server.start_http(shutdown_signal()).await;

    pool.shutdown();
    pool.wait().await;
    info!("Workers stopped");

    served
}
