use crate::config::Config;
use crate::data::risk_cache::RiskCache;
use crate::risk::queue::{self, ComputeWorker};
use crate::risk::{RiskService, compute};
use crate::state::{AppState, ServiceStatus};
use crate::utils::fmt_duration;
use crate::web::create_router;
use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const WEB_SERVICE: &str = "web";
const COMPUTE_SERVICE: &str = "compute";

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
    worker: ComputeWorker,
}

impl App {
    /// Connect, migrate, seed and recover the risk score cache.
    ///
    /// Orphaned `computing` claims are reset here, before the router exists,
    /// so no read can observe one.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let slow_threshold = Duration::from_millis(500);

        let connect_options = sqlx::postgres::PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let max_connections = (config.risk.compute_concurrency as u32 + 4).max(8);
        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(max_connections)
            .acquire_slow_threshold(slow_threshold)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(
            max_connections,
            acquire_timeout = "4s",
            acquire_slow_threshold = fmt_duration(slow_threshold),
            "database pool established"
        );

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        if let Some(seed_file) = &config.seed_file {
            let imported = crate::data::seed::import_if_empty(&db_pool, seed_file)
                .await
                .context("Failed to import seed data")?;
            if imported > 0 {
                info!(count = imported, "Seed data imported");
            }
        }

        let cache = RiskCache::new(db_pool.clone(), config.risk.clone());
        let (compute_queue, worker) = queue::channel(
            compute::compute_fn(cache),
            config.risk.compute_concurrency,
        );
        let risk = RiskService::new(
            db_pool.clone(),
            config.risk.clone(),
            Arc::new(compute_queue),
        );

        let reset = risk
            .reset_stuck_on_restart()
            .await
            .context("Failed to reset orphaned risk score computations")?;
        if reset > 0 {
            warn!(count = reset, "Reset orphaned risk score computations");
        }

        let app_state = AppState::new(db_pool, risk);
        app_state
            .service_statuses
            .set(WEB_SERVICE, ServiceStatus::Starting);
        app_state
            .service_statuses
            .set(COMPUTE_SERVICE, ServiceStatus::Starting);

        Ok(App {
            config,
            app_state,
            worker,
        })
    }

    /// Serve until a shutdown signal, then drain the compute worker.
    pub async fn run(self) -> ExitCode {
        let App {
            config,
            app_state,
            worker,
        } = self;

        let shutdown = CancellationToken::new();
        let statuses = app_state.service_statuses.clone();

        let worker_handle = {
            let shutdown = shutdown.clone();
            let statuses = statuses.clone();
            let grace = config.shutdown_timeout;
            tokio::spawn(async move {
                statuses.set(COMPUTE_SERVICE, ServiceStatus::Active);
                worker.run(shutdown, grace).await;
                statuses.set(COMPUTE_SERVICE, ServiceStatus::Disabled);
            })
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = ?e, %addr, "Failed to bind web server");
                shutdown.cancel();
                let _ = worker_handle.await;
                return ExitCode::FAILURE;
            }
        };
        info!(%addr, "web server listening");
        statuses.set(WEB_SERVICE, ServiceStatus::Active);

        let router = create_router(app_state);
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
            .await;

        let mut exit_code = ExitCode::SUCCESS;
        if let Err(e) = served {
            error!(error = ?e, "Web server exited with error");
            statuses.set(WEB_SERVICE, ServiceStatus::Error);
            exit_code = ExitCode::FAILURE;
        }

        // The web server may have stopped on its own; make sure the worker follows.
        shutdown.cancel();

        let start = Instant::now();
        let timeout = config.shutdown_timeout + Duration::from_secs(1);
        match tokio::time::timeout(timeout, worker_handle).await {
            Ok(Ok(())) => info!(
                elapsed = fmt_duration(start.elapsed()),
                "graceful shutdown complete"
            ),
            Ok(Err(e)) => {
                error!(error = ?e, "Compute worker task failed");
                exit_code = ExitCode::FAILURE;
            }
            Err(_) => {
                warn!(
                    timeout = fmt_duration(timeout),
                    "Compute worker did not stop in time"
                );
                exit_code = ExitCode::FAILURE;
            }
        }

        exit_code
    }
}

/// Resolves on Ctrl+C or SIGTERM, cancelling `shutdown` so background work stops too.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("received ctrl+c, gracefully shutting down...");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM, gracefully shutting down...");
            }
            Err(e) => {
                error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
