//! Long-running worker pool: N concurrent claim loops driving the queue
//! to completion. Shutdown is graceful; a loop finishes its current
//! claim's flush before exiting, so no transaction is ever interrupted.

use crate::db::Database;
use crate::errors::SentryError;
use crate::lookup::LookupEngine;
use crate::notify::NotifierHandle;
use crate::pipeline::{process_batch, BatchOutcome};
use crate::retry::RetryPolicy;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Grace period before a drained-but-unfinished job (crash between the
/// final flush and its completion write) is closed out by the idempotent
/// completion write.
const COMPLETION_GRACE_SECS: i64 = 30;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub idle_sleep: Duration,
}

/// Run `workers` claim loops until shutdown. Returns an error only for
/// storage-fatal conditions; the caller exits non-zero on those.
pub async fn run_worker_pool(
    db: Database,
    engine: Arc<dyn LookupEngine>,
    notifier: NotifierHandle,
    options: WorkerOptions,
    shutdown: CancellationToken,
) -> Result<(), SentryError> {
    info!(
        "Worker pool starting: {} loops, batch size {}",
        options.workers, options.batch_size
    );

    let mut set = JoinSet::new();
    for worker_id in 0..options.workers {
        let db = db.clone();
        let engine = engine.clone();
        let notifier = notifier.clone();
        let options = options.clone();
        let shutdown = shutdown.clone();
        set.spawn(async move {
            claim_loop(worker_id, db, engine, notifier, options, shutdown).await
        });
    }

    let mut fatal = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // One fatal loop takes the whole pool down.
                error!("Worker loop failed fatally: {e}");
                shutdown.cancel();
                fatal.get_or_insert(e);
            }
            Err(e) => {
                error!("Worker loop panicked: {e}");
                shutdown.cancel();
                fatal.get_or_insert(SentryError::Internal(format!("worker panic: {e}")));
            }
        }
    }

    match fatal {
        Some(e) => Err(e),
        None => {
            info!("Worker pool stopped");
            Ok(())
        }
    }
}

async fn claim_loop(
    worker_id: usize,
    db: Database,
    engine: Arc<dyn LookupEngine>,
    notifier: NotifierHandle,
    options: WorkerOptions,
    shutdown: CancellationToken,
) -> Result<(), SentryError> {
    let policy = RetryPolicy::storage();

    while !shutdown.is_cancelled() {
        let job = match db.oldest_claimable_job().await {
            Ok(Some(job)) => job,
            Ok(None) => {
                idle(&options, &shutdown).await;
                continue;
            }
            Err(e) if e.is_transient() => {
                warn!("Worker {worker_id}: transient error selecting job: {e}");
                idle(&options, &shutdown).await;
                continue;
            }
            Err(e) => return Err(e),
        };

        match process_batch(&db, engine.as_ref(), &notifier, &policy, job.id, options.batch_size)
            .await
        {
            // More of this job (or the next) may be waiting; claim again
            // immediately.
            Ok(BatchOutcome::Processed(_))
            | Ok(BatchOutcome::Completed(_))
            | Ok(BatchOutcome::Failed(_)) => {}
            Ok(BatchOutcome::Contended(job)) => {
                let stale = job.updated_at < Utc::now() - ChronoDuration::seconds(COMPLETION_GRACE_SECS);
                if job.processed >= job.total && stale {
                    // The worker holding the final slice is gone; the
                    // completion write is idempotent, so close it out.
                    warn!("Worker {worker_id}: closing out abandoned job {}", job.id);
                    db.finish_batch(job.id, 0).await?;
                } else {
                    idle(&options, &shutdown).await;
                }
            }
            Err(e) if e.is_transient() => {
                // Retry budget exhausted: abandon the batch. The job was
                // not advanced and will be re-claimed.
                warn!("Worker {worker_id}: abandoning batch of job {}: {e}", job.id);
                idle(&options, &shutdown).await;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

async fn idle(options: &WorkerOptions, shutdown: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(options.idle_sleep) => {}
    }
}
