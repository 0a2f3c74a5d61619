//! The one batch-processing routine everything drives: claim a slice,
//! materialize it, look it up, flush it, account for it. Long-lived
//! workers loop over it, the scheduler's jobs are drained through it, and
//! `POST /jobs/process` runs exactly one cycle of it synchronously.

use crate::db::{Database, DomainUpdate, FlushOutcome};
use crate::errors::SentryError;
use crate::lookup::LookupEngine;
use crate::models::{clean_name, Domain, Job, JobPayload, JobStatus, LookupResult};
use crate::notify::NotifierHandle;
use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What one `process_batch` cycle did.
#[derive(Debug)]
pub enum BatchOutcome {
    /// A slice was claimed, looked up, and flushed.
    Processed(Job),
    /// Nothing left; the job is complete.
    Completed(Job),
    /// Nothing claimable right now: a concurrent caller owns the final
    /// slice and has not finished its flush. Retry or wait.
    Contended(Job),
    /// The job's payload could not be interpreted.
    Failed(Job),
}

impl BatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOutcome::Processed(_) => "processed",
            BatchOutcome::Completed(_) => "completed",
            BatchOutcome::Contended(_) => "contended",
            BatchOutcome::Failed(_) => "failed",
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            BatchOutcome::Processed(job)
            | BatchOutcome::Completed(job)
            | BatchOutcome::Contended(job)
            | BatchOutcome::Failed(job) => job,
        }
    }
}

/// Run one claim + lookup + flush cycle against a job.
///
/// Errors inside the batch are absorbed into the job's `errors` counter;
/// the flush always runs (possibly with zero rows) so `processed` advances
/// durably. Only storage errors escape to the caller.
pub async fn process_batch(
    db: &Database,
    engine: &dyn LookupEngine,
    notifier: &NotifierHandle,
    policy: &RetryPolicy,
    job_id: i64,
    batch_size: usize,
) -> Result<BatchOutcome, SentryError> {
    let claim = policy.run(|| db.claim(job_id, batch_size)).await?;

    let Some(claim) = claim else {
        let job = db.job(job_id).await?;
        return Ok(match job.status {
            JobStatus::Completed => BatchOutcome::Completed(job),
            JobStatus::Failed => BatchOutcome::Failed(job),
            _ => BatchOutcome::Contended(job),
        });
    };

    let job = db.job(job_id).await?;
    let payload = match JobPayload::decode(job.kind, &job.payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Job {} payload is uninterpretable: {e}", job.id);
            db.mark_job_failed(job.id).await?;
            return Ok(BatchOutcome::Failed(db.job(job.id).await?));
        }
    };

    let started = Instant::now();
    let slice = payload.slice(claim.start, claim.end);
    let (outcome, errors) = match slice {
        JobPayload::Import(names) => process_import_slice(db, engine, &names, job.user_id).await?,
        JobPayload::Check(ids) => process_check_slice(db, engine, &ids).await?,
    };

    // Events go out only after the flush transaction has committed; the
    // producer side never blocks.
    let transitions = outcome.transitions.len();
    for event in outcome.transitions {
        notifier.publish(event);
    }

    let job = policy.run(|| db.finish_batch(job_id, errors)).await?;

    metrics::histogram!("sentry_batch_duration_seconds").record(started.elapsed().as_secs_f64());
    if job.status == JobStatus::Completed {
        metrics::counter!("sentry_jobs_completed_total").increment(1);
    }
    info!(
        "Job {} slice [{}, {}): {} rows, {} transitions, {} errors ({}/{} done)",
        job.id, claim.start, claim.end, outcome.rows_written, transitions, errors,
        job.processed, job.total
    );

    Ok(BatchOutcome::Processed(job))
}

/// Import slice: clean the raw names, look every valid one up, flush as
/// upserts. Invalid names and failed lookups are the batch's errors;
/// results carrying an error never touch registration state.
async fn process_import_slice(
    db: &Database,
    engine: &dyn LookupEngine,
    raw_names: &[String],
    user_id: Option<i64>,
) -> Result<(FlushOutcome, u64), SentryError> {
    let mut invalid = 0u64;
    let mut cleaned = Vec::with_capacity(raw_names.len());
    for raw in raw_names {
        match clean_name(raw) {
            Ok(name) => cleaned.push(name),
            Err(_) => {
                debug!("Rejecting invalid import entry: {raw:?}");
                invalid += 1;
            }
        }
    }

    // Every cleaned name is looked up, tracked or not, so a re-import
    // refreshes registration state; the name's uniqueness is enforced by
    // the upsert in the flush.
    debug!(
        "Import slice: {} entries, {} invalid",
        raw_names.len(),
        invalid
    );

    let results = engine.lookup_batch(&cleaned).await;
    let (flushable, lookup_errors) = partition_results(results);

    let outcome = db.flush_import(&flushable, user_id).await?;
    Ok((outcome, invalid + lookup_errors))
}

/// Check slice: bulk-read the current rows, look their names up, flush
/// keyed updates. Ids deleted since enqueue are skipped silently.
async fn process_check_slice(
    db: &Database,
    engine: &dyn LookupEngine,
    ids: &[i64],
) -> Result<(FlushOutcome, u64), SentryError> {
    let domains = db.domains_by_ids(ids).await?;
    let id_by_name: HashMap<&str, i64> =
        domains.iter().map(|d| (d.name.as_str(), d.id)).collect();
    let names: Vec<String> = domains.iter().map(|d| d.name.clone()).collect();

    let results = engine.lookup_batch(&names).await;
    let (flushable, lookup_errors) = partition_results(results);

    let updates: Vec<DomainUpdate> = flushable
        .into_iter()
        .filter_map(|result| {
            id_by_name.get(result.name.as_str()).map(|&id| DomainUpdate {
                id,
                is_registered: result.is_registered,
                expiry_date: result.expiry_date,
            })
        })
        .collect();

    let outcome = db.flush_check(&updates).await?;
    Ok((outcome, lookup_errors))
}

/// Split a result map into flushable results and the error count. An
/// errored lookup says nothing about registration state, so it must not
/// reach a flush (a bogus registered -> available flip would page someone).
fn partition_results(results: HashMap<String, LookupResult>) -> (Vec<LookupResult>, u64) {
    let mut flushable = Vec::with_capacity(results.len());
    let mut errors = 0u64;
    for result in results.into_values() {
        if result.counts_as_error() {
            errors += 1;
        } else {
            flushable.push(result);
        }
    }
    (flushable, errors)
}

/// Single-add path: clean, look up once, upsert. Shares the engine and
/// flush semantics with the bulk pipeline. When the first lookup fails the
/// name is still tracked (bare row), and the stale scan revisits it.
pub async fn add_domain(
    db: &Database,
    engine: &dyn LookupEngine,
    notifier: &NotifierHandle,
    raw_name: &str,
    user_id: Option<i64>,
) -> Result<Domain, SentryError> {
    let name = clean_name(raw_name)?;
    let results = engine.lookup_batch(std::slice::from_ref(&name)).await;
    let result = results
        .into_values()
        .next()
        .ok_or_else(|| SentryError::Internal(format!("engine returned no result for {name}")))?;

    if result.counts_as_error() {
        debug!("Initial lookup failed for {name}; tracking without state");
        return db.insert_bare_domain(&name, user_id).await;
    }

    let outcome = db.flush_import(std::slice::from_ref(&result), user_id).await?;
    for event in outcome.transitions {
        notifier.publish(event);
    }
    db.domain_by_name(&name)
        .await?
        .ok_or_else(|| SentryError::Internal(format!("upsert lost row for {name}")))
}
