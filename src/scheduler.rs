//! Recurring expiry scanner. Each tick collects registered domains whose
//! expiry date has arrived plus a bounded batch of stale domains, and
//! enqueues them as one `whois_check` job. The scheduler never processes
//! inline; workers (or an active client) drain what it enqueues.

use crate::db::Database;
use crate::errors::SentryError;
use crate::models::{Job, JobPayload};
use chrono::{Duration as ChronoDuration, Local, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub interval: Duration,
    pub stale_batch: usize,
    pub stale_after_hours: i64,
}

pub async fn run_scheduler(db: Database, options: SchedulerOptions, shutdown: CancellationToken) {
    info!(
        "Scheduler running: every {:?}, stale batch {}, stale after {}h",
        options.interval, options.stale_batch, options.stale_after_hours
    );

    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first interval tick fires immediately; skip it so startup does
    // not race the rest of the process coming up.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match tick(&db, &options).await {
            Ok(Some(job)) => {
                info!("Scheduler enqueued whois_check job {} ({} domains)", job.id, job.total);
            }
            Ok(None) => {}
            // Storage hiccups are not fatal here; the next tick retries.
            Err(e) => warn!("Scheduler tick failed: {e}"),
        }
    }
    info!("Scheduler stopped");
}

/// One scan: expired-but-registered domains (soonest first) plus up to
/// `stale_batch` domains unchecked for longer than the threshold.
pub async fn tick(db: &Database, options: &SchedulerOptions) -> Result<Option<Job>, SentryError> {
    let today = Local::now().date_naive();
    let expiring = db.expiring_domain_ids(today).await?;

    let cutoff = Utc::now() - ChronoDuration::hours(options.stale_after_hours);
    let stale = db.stale_domain_ids(cutoff, options.stale_batch as i64).await?;

    let mut seen: HashSet<i64> = HashSet::new();
    let mut ids: Vec<i64> = Vec::with_capacity(expiring.len() + stale.len());
    for id in expiring.into_iter().chain(stale) {
        if seen.insert(id) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Ok(None);
    }

    metrics::counter!("sentry_scheduler_enqueued_total").increment(ids.len() as u64);
    // System-owned job: no user id.
    let job = db.create_job(None, &JobPayload::Check(ids)).await?;
    Ok(Some(job))
}
