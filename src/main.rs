use anyhow::Context;
use clap::{Parser, Subcommand};
use domain_sentry::{
    api::{self, AppState},
    config::Config,
    db::Database,
    lookup::build_engine,
    metrics, notify,
    notify::NotifySink,
    registry::Registry,
    scheduler::{run_scheduler, SchedulerOptions},
    worker::{run_worker_pool, WorkerOptions},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "domain-sentry", version, about = "Bulk domain registration monitor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API with scheduler, notifier, and worker pool (default)
    Serve,
    /// Run the worker loop only
    Daemon {
        /// In-batch HTTP fan-out of the lookup engine
        #[arg(long)]
        concurrency: Option<usize>,
        /// Concurrent claim loops
        #[arg(long)]
        workers: Option<usize>,
        /// Slice size claimed per iteration
        #[arg(long = "batch")]
        batch: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "domain_sentry=info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("loading configuration")?;

    // CLI flags override the environment, clamped to the same ranges.
    if let Some(Command::Daemon {
        concurrency,
        workers,
        batch,
    }) = &cli.command
    {
        if let Some(concurrency) = concurrency {
            config.concurrency = (*concurrency).clamp(10, 1000);
        }
        if let Some(workers) = workers {
            config.workers = (*workers).clamp(1, 32);
        }
        if let Some(batch) = batch {
            config.batch_size = (*batch).clamp(1, 5000);
        }
    }
    let config = Arc::new(config);

    let db = Database::connect(&config.database_url)
        .await
        .context("connecting to storage")?;
    let registry = Arc::new(Registry::new(&config.rdap_bootstrap_url)?);
    let engine = build_engine(
        registry,
        config.lookup_shards,
        config.concurrency,
        config.fallback_cap,
    )?;
    metrics::init_metrics();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                shutdown.cancel();
            }
        });
    }

    // The notifier sink outlives every producer and drains on shutdown.
    let (notifier, events) = notify::channel();
    let sink = NotifySink::new(&config, db.clone());
    let sink_task = tokio::spawn(sink.run(events));

    let worker_options = WorkerOptions {
        workers: config.workers,
        batch_size: config.batch_size,
        idle_sleep: Duration::from_secs(config.worker_idle_sleep_secs),
    };

    match cli.command {
        Some(Command::Daemon { .. }) => {
            run_worker_pool(db, engine, notifier, worker_options, shutdown.clone())
                .await
                .context("worker pool failed")?;
        }
        Some(Command::Serve) | None => {
            let scheduler_task = tokio::spawn(run_scheduler(
                db.clone(),
                SchedulerOptions {
                    interval: Duration::from_secs(config.scheduler_interval_secs),
                    stale_batch: config.stale_batch,
                    stale_after_hours: config.stale_after_hours,
                },
                shutdown.clone(),
            ));
            let pool_task = tokio::spawn(run_worker_pool(
                db.clone(),
                engine.clone(),
                notifier.clone(),
                worker_options,
                shutdown.clone(),
            ));

            let state = AppState {
                db,
                engine,
                notifier,
                config: config.clone(),
                started: Instant::now(),
            };
            let app = api::router(state);

            let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!("Domain sentry listening on {addr}");
            info!("Health check: http://{addr}/health");
            info!("Metrics: http://{addr}/metrics");

            let graceful = shutdown.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await
                .context("HTTP server failed")?;

            shutdown.cancel();
            scheduler_task.await.ok();
            pool_task
                .await
                .context("worker pool panicked")?
                .context("worker pool failed")?;
        }
    }

    // Every producer handle is gone by now; the sink drains and exits.
    sink_task.await.ok();
    info!("Shutdown complete");
    Ok(())
}
