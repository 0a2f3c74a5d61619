//! Persistence for domains and jobs.
//!
//! Two operations here carry the pipeline's concurrency correctness: the
//! atomic claim, which hands each caller a disjoint `[start, end)` slice of
//! a job's payload, and the batched flushes, which write a whole slice's
//! results in one transaction. Everything else is plain row plumbing.

use crate::dialect::Dialect;
use crate::errors::SentryError;
use crate::models::{Domain, Job, JobPayload, JobStatus, LookupResult, NotificationEvent};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// IN-list chunk for the dedup pre-filter and bulk id reads.
const CHUNK: usize = 10_000;

/// A claimed half-open index range of a job's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub start: usize,
    pub end: usize,
}

impl Claim {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// What a batched flush observed while writing.
#[derive(Debug, Default)]
pub struct FlushOutcome {
    /// Domains that went registered -> available in this flush.
    pub transitions: Vec<NotificationEvent>,
    pub rows_written: u64,
}

/// An update the check flush applies to one domain row.
#[derive(Debug, Clone)]
pub struct DomainUpdate {
    pub id: i64,
    pub is_registered: bool,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    dialect: Dialect,
}

impl Database {
    /// Connect (creating the file if missing), apply pragmas, and run
    /// embedded migrations. Memory databases get a single-connection pool,
    /// since each SQLite memory connection is its own database.
    pub async fn connect(database_url: &str) -> Result<Self, SentryError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Storage ready at {database_url}");

        Ok(Self {
            pool,
            dialect: Dialect::Sqlite,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    pub async fn create_job(
        &self,
        user_id: Option<i64>,
        payload: &JobPayload,
    ) -> Result<Job, SentryError> {
        let now = Utc::now();
        let encoded = payload.encode()?;
        let job = sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (user_id, kind, status, total, processed, errors, payload, created_at, updated_at) \
             VALUES (?, ?, ?, ?, 0, 0, ?, ?, ?) \
             RETURNING id, user_id, kind, status, total, processed, errors, payload, created_at, updated_at",
        )
        .bind(user_id)
        .bind(payload.kind())
        .bind(JobStatus::Pending)
        .bind(payload.len() as i64)
        .bind(&encoded)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!("Created {} job {} with {} entries", job.kind.as_str(), job.id, job.total);
        Ok(job)
    }

    pub async fn job(&self, id: i64) -> Result<Job, SentryError> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SentryError::JobNotFound(id))
    }

    pub async fn recent_jobs(&self, limit: i64) -> Result<Vec<Job>, SentryError> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// The job a worker should pick up next: oldest still claimable.
    /// Includes processing jobs whose final slice was claimed but whose
    /// completion write was lost; the pipeline closes those out.
    pub async fn oldest_claimable_job(&self) -> Result<Option<Job>, SentryError> {
        let job = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status IN ('pending', 'processing') \
             ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    /// Atomically reserve the next slice of a job's payload.
    ///
    /// The read and the write happen inside one write transaction, so two
    /// concurrent callers observe distinct `processed` values and receive
    /// disjoint ranges. Returns `None` when there is nothing left to claim.
    pub async fn claim(&self, job_id: i64, max_size: usize) -> Result<Option<Claim>, SentryError> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(self.dialect.begin_claim()).execute(&mut *conn).await?;

        let result = Self::claim_locked(&mut conn, job_id, max_size).await;
        match &result {
            Ok(_) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            Err(_) => {
                // Best effort; a dropped connection rolls back anyway.
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            }
        }
        result
    }

    async fn claim_locked(
        conn: &mut sqlx::pool::PoolConnection<sqlx::Sqlite>,
        job_id: i64,
        max_size: usize,
    ) -> Result<Option<Claim>, SentryError> {
        let row = sqlx::query("SELECT status, processed, total FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&mut **conn)
            .await?;
        let Some(row) = row else {
            return Err(SentryError::JobNotFound(job_id));
        };

        let status: JobStatus = row.try_get("status")?;
        let processed: i64 = row.try_get("processed")?;
        let total: i64 = row.try_get("total")?;

        if !matches!(status, JobStatus::Pending | JobStatus::Processing) || processed >= total {
            return Ok(None);
        }

        let end = (processed + max_size as i64).min(total);
        sqlx::query("UPDATE jobs SET processed = ?, status = ?, updated_at = ? WHERE id = ?")
            .bind(end)
            .bind(JobStatus::Processing)
            .bind(Utc::now())
            .bind(job_id)
            .execute(&mut **conn)
            .await?;

        Ok(Some(Claim {
            start: processed as usize,
            end: end as usize,
        }))
    }

    /// Post-flush accounting: add the batch's error count and, when the
    /// payload is exhausted, mark the job completed. Safe to repeat.
    pub async fn finish_batch(&self, job_id: i64, errors: u64) -> Result<Job, SentryError> {
        sqlx::query(
            "UPDATE jobs SET errors = errors + ?, \
             status = CASE WHEN processed >= total AND status IN ('pending', 'processing') \
                           THEN 'completed' ELSE status END, \
             updated_at = ? \
             WHERE id = ?",
        )
        .bind(errors as i64)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        self.job(job_id).await
    }

    /// Flip a processing job back to pending, leaving `processed` alone so
    /// workers continue from the current offset.
    pub async fn resume_job(&self, id: i64) -> Result<Job, SentryError> {
        sqlx::query("UPDATE jobs SET status = 'pending', updated_at = ? WHERE id = ? AND status = 'processing'")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.job(id).await
    }

    pub async fn mark_job_failed(&self, id: i64) -> Result<(), SentryError> {
        sqlx::query("UPDATE jobs SET status = 'failed', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_job(&self, id: i64) -> Result<(), SentryError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SentryError::JobNotFound(id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Domains
    // ------------------------------------------------------------------

    /// Dedup pre-filter: which of these names are already tracked. Plain
    /// chunked reads outside any transaction.
    pub async fn existing(&self, names: &[String]) -> Result<HashSet<String>, SentryError> {
        let mut found = HashSet::new();
        for chunk in names.chunks(CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT name FROM domains WHERE name IN ({placeholders})");
            let mut query = sqlx::query_scalar::<_, String>(&sql);
            for name in chunk {
                query = query.bind(name);
            }
            found.extend(query.fetch_all(&self.pool).await?);
        }
        Ok(found)
    }

    /// Bulk read for the check path; rows come back in no particular order
    /// and missing ids are silently absent (deleted since enqueue).
    pub async fn domains_by_ids(&self, ids: &[i64]) -> Result<Vec<Domain>, SentryError> {
        let mut domains = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT * FROM domains WHERE id IN ({placeholders})");
            let mut query = sqlx::query_as::<_, Domain>(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            domains.extend(query.fetch_all(&self.pool).await?);
        }
        Ok(domains)
    }

    pub async fn domain(&self, id: i64) -> Result<Domain, SentryError> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SentryError::DomainNotFound(id))
    }

    pub async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, SentryError> {
        let domain = sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(domain)
    }

    pub async fn list_domains(
        &self,
        registered: Option<bool>,
        limit: i64,
    ) -> Result<Vec<Domain>, SentryError> {
        let domains = match registered {
            Some(flag) => {
                sqlx::query_as::<_, Domain>(
                    "SELECT * FROM domains WHERE is_registered = ? ORDER BY name ASC LIMIT ?",
                )
                .bind(flag)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Domain>("SELECT * FROM domains ORDER BY name ASC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(domains)
    }

    /// User-initiated removal; the pipeline itself never deletes rows.
    pub async fn delete_domain(&self, id: i64) -> Result<(), SentryError> {
        let result = sqlx::query("DELETE FROM domains WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SentryError::DomainNotFound(id));
        }
        Ok(())
    }

    /// Ids for a user-scoped `whois_check --all` job; a `None` user means
    /// every tracked domain (system scope).
    pub async fn domain_ids_for_user(&self, user_id: Option<i64>) -> Result<Vec<i64>, SentryError> {
        let ids = match user_id {
            Some(user_id) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM domains WHERE added_by = ? ORDER BY id ASC",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT id FROM domains ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(ids)
    }

    /// Email of the user tracking a domain, when there is one.
    pub async fn owner_email(&self, domain_id: i64) -> Result<Option<String>, SentryError> {
        let email = sqlx::query_scalar::<_, String>(
            "SELECT u.email FROM users u JOIN domains d ON d.added_by = u.id WHERE d.id = ?",
        )
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(email)
    }

    /// Registered domains whose expiry date has arrived, soonest first.
    pub async fn expiring_domain_ids(&self, today: NaiveDate) -> Result<Vec<i64>, SentryError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM domains WHERE is_registered = 1 AND expiry_date IS NOT NULL \
             AND expiry_date <= ? ORDER BY expiry_date ASC",
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Domains not checked since the cutoff (never-checked first).
    pub async fn stale_domain_ids(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>, SentryError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM domains WHERE last_checked IS NULL OR last_checked < ? \
             ORDER BY last_checked ASC LIMIT ?",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Batched flushes
    // ------------------------------------------------------------------

    /// Write one import slice's results in a single transaction. New names
    /// insert; collisions refresh registration state in place (so a
    /// re-import picks up the fresh expiry). Registered -> available
    /// transitions are detected against the row state inside the
    /// transaction.
    pub async fn flush_import(
        &self,
        results: &[LookupResult],
        user_id: Option<i64>,
    ) -> Result<FlushOutcome, SentryError> {
        let now = Utc::now();
        let upsert = format!(
            "INSERT INTO domains (name, expiry_date, is_registered, last_checked, added_by, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) {}",
            self.dialect.domain_upsert_conflict()
        );

        let mut outcome = FlushOutcome::default();
        let mut tx = self.pool.begin().await?;

        for result in results {
            let prior = sqlx::query("SELECT id, is_registered FROM domains WHERE name = ?")
                .bind(&result.name)
                .fetch_optional(&mut *tx)
                .await?;

            sqlx::query(&upsert)
                .bind(&result.name)
                .bind(result.expiry_date)
                .bind(result.is_registered)
                .bind(now)
                .bind(user_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            outcome.rows_written += 1;

            if let Some(prior) = prior {
                let was_registered: bool = prior.try_get("is_registered")?;
                if was_registered && !result.is_registered {
                    outcome.transitions.push(NotificationEvent {
                        domain_id: prior.try_get("id")?,
                        name: result.name.clone(),
                        observed_at: now,
                    });
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Write one check slice's updates in a single transaction, keyed by
    /// id. A result with no expiry leaves the stored date untouched; every
    /// touched row gets `last_checked = now`.
    pub async fn flush_check(&self, updates: &[DomainUpdate]) -> Result<FlushOutcome, SentryError> {
        let now = Utc::now();
        let mut outcome = FlushOutcome::default();
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let prior = sqlx::query("SELECT name, is_registered FROM domains WHERE id = ?")
                .bind(update.id)
                .fetch_optional(&mut *tx)
                .await?;
            let Some(prior) = prior else {
                // Deleted since the job was enqueued; nothing to update.
                continue;
            };

            sqlx::query(
                "UPDATE domains SET is_registered = ?, \
                 expiry_date = COALESCE(?, expiry_date), last_checked = ? WHERE id = ?",
            )
            .bind(update.is_registered)
            .bind(update.expiry_date)
            .bind(now)
            .bind(update.id)
            .execute(&mut *tx)
            .await?;
            outcome.rows_written += 1;

            let was_registered: bool = prior.try_get("is_registered")?;
            if was_registered && !update.is_registered {
                outcome.transitions.push(NotificationEvent {
                    domain_id: update.id,
                    name: prior.try_get("name")?,
                    observed_at: now,
                });
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Track a name with no known registration state yet (single-add whose
    /// first lookup failed). The stale scan picks it up on the next tick.
    pub async fn insert_bare_domain(
        &self,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<Domain, SentryError> {
        sqlx::query(
            "INSERT INTO domains (name, is_registered, added_by, created_at) \
             VALUES (?, 0, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.domain_by_name(name)
            .await?
            .ok_or_else(|| SentryError::Internal(format!("insert lost row for {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LookupSource;
    use futures::future::join_all;

    async fn db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    fn registered(name: &str, expiry: &str) -> LookupResult {
        LookupResult {
            name: name.to_string(),
            is_registered: true,
            expiry_date: Some(expiry.parse().unwrap()),
            registrar: Some("Example Registrar".to_string()),
            source: LookupSource::Rdap,
            error: None,
        }
    }

    fn unregistered(name: &str) -> LookupResult {
        LookupResult {
            name: name.to_string(),
            is_registered: false,
            expiry_date: None,
            registrar: None,
            source: LookupSource::Rdap,
            error: None,
        }
    }

    fn import_payload(n: usize) -> JobPayload {
        JobPayload::Import((0..n).map(|i| format!("name{i}.test")).collect())
    }

    #[tokio::test]
    async fn job_creation_and_fetch_round_trip() {
        let db = db().await;
        let job = db.create_job(None, &import_payload(3)).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total, 3);
        assert_eq!(job.processed, 0);

        let fetched = db.job(job.id).await.unwrap();
        assert_eq!(fetched.total, 3);
        assert_eq!(
            JobPayload::decode(fetched.kind, &fetched.payload).unwrap().len(),
            3
        );

        assert!(matches!(db.job(9999).await, Err(SentryError::JobNotFound(9999))));
    }

    #[tokio::test]
    async fn claims_partition_the_payload_without_overlap_or_gap() {
        let db = db().await;
        let job = db.create_job(None, &import_payload(10)).await.unwrap();

        let mut claims = Vec::new();
        while let Some(claim) = db.claim(job.id, 3).await.unwrap() {
            claims.push(claim);
        }

        assert_eq!(
            claims,
            vec![
                Claim { start: 0, end: 3 },
                Claim { start: 3, end: 6 },
                Claim { start: 6, end: 9 },
                Claim { start: 9, end: 10 },
            ]
        );

        // Drained: further claims are empty, processed is monotone at total.
        assert!(db.claim(job.id, 3).await.unwrap().is_none());
        let job = db.job(job.id).await.unwrap();
        assert_eq!(job.processed, 10);
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn concurrent_claims_receive_disjoint_ranges() {
        let db = db().await;
        let job = db.create_job(None, &import_payload(1000)).await.unwrap();

        let claims: Vec<Option<Claim>> = join_all((0..20).map(|_| {
            let db = db.clone();
            let id = job.id;
            async move { db.claim(id, 50).await.unwrap() }
        }))
        .await;

        let mut ranges: Vec<Claim> = claims.into_iter().flatten().collect();
        ranges.sort_by_key(|c| c.start);

        assert_eq!(ranges.len(), 20);
        let mut cursor = 0;
        for claim in &ranges {
            assert_eq!(claim.start, cursor, "ranges must be gapless");
            cursor = claim.end;
        }
        assert_eq!(cursor, 1000);
    }

    #[tokio::test]
    async fn finish_batch_completes_exactly_at_total_and_is_idempotent() {
        let db = db().await;
        let job = db.create_job(None, &import_payload(4)).await.unwrap();

        db.claim(job.id, 2).await.unwrap().unwrap();
        let mid = db.finish_batch(job.id, 1).await.unwrap();
        assert_eq!(mid.status, JobStatus::Processing);
        assert_eq!(mid.errors, 1);

        db.claim(job.id, 2).await.unwrap().unwrap();
        let done = db.finish_batch(job.id, 0).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.processed, done.total);

        // Repeating the completion write changes nothing.
        let again = db.finish_batch(job.id, 0).await.unwrap();
        assert_eq!(again.status, JobStatus::Completed);
        assert_eq!(again.errors, 1);
    }

    #[tokio::test]
    async fn resume_flips_processing_to_pending_keeping_offset() {
        let db = db().await;
        let job = db.create_job(None, &import_payload(10)).await.unwrap();
        db.claim(job.id, 4).await.unwrap().unwrap();

        let resumed = db.resume_job(job.id).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Pending);
        assert_eq!(resumed.processed, 4);

        // The next claim continues from the stored offset.
        let claim = db.claim(job.id, 4).await.unwrap().unwrap();
        assert_eq!(claim, Claim { start: 4, end: 8 });
    }

    #[tokio::test]
    async fn import_flush_dedups_and_reimport_refreshes_expiry() {
        let db = db().await;

        let first = vec![
            registered("example.com", "2026-08-14"),
            unregistered("bar.test"),
        ];
        db.flush_import(&first, None).await.unwrap();

        // Same names again, one duplicated within the batch as well.
        let second = vec![
            registered("example.com", "2027-08-14"),
            registered("example.com", "2027-08-14"),
            unregistered("bar.test"),
        ];
        db.flush_import(&second, None).await.unwrap();

        let all = db.list_domains(None, 100).await.unwrap();
        assert_eq!(all.len(), 2, "exactly one row per unique name");

        let example = db.domain_by_name("example.com").await.unwrap().unwrap();
        assert_eq!(example.expiry_date.unwrap().to_string(), "2027-08-14");
        assert!(example.is_registered);
        assert!(example.last_checked.is_some());
    }

    #[tokio::test]
    async fn negative_result_preserves_stored_expiry() {
        let db = db().await;
        db.flush_import(&[registered("keep.test", "2026-01-01")], None)
            .await
            .unwrap();

        // A later 404 flips registration but must not clear the date.
        let outcome = db
            .flush_import(&[unregistered("keep.test")], None)
            .await
            .unwrap();
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(outcome.transitions[0].name, "keep.test");

        let row = db.domain_by_name("keep.test").await.unwrap().unwrap();
        assert!(!row.is_registered);
        assert_eq!(row.expiry_date.unwrap().to_string(), "2026-01-01");
        assert!(row.last_checked.is_some());
    }

    #[tokio::test]
    async fn check_flush_detects_each_transition_exactly_once() {
        let db = db().await;
        db.flush_import(&[registered("expired.example", "2025-01-01")], None)
            .await
            .unwrap();
        let domain = db.domain_by_name("expired.example").await.unwrap().unwrap();

        let updates = vec![DomainUpdate {
            id: domain.id,
            is_registered: false,
            expiry_date: None,
        }];

        let outcome = db.flush_check(&updates).await.unwrap();
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(outcome.transitions[0].domain_id, domain.id);
        assert_eq!(outcome.transitions[0].name, "expired.example");

        // Identical re-run: same rows, but no transition the second time
        // because the prior state is already unregistered.
        let outcome = db.flush_check(&updates).await.unwrap();
        assert!(outcome.transitions.is_empty());
        let row = db.domain(domain.id).await.unwrap();
        assert!(!row.is_registered);
    }

    #[tokio::test]
    async fn check_flush_skips_rows_deleted_since_enqueue() {
        let db = db().await;
        let outcome = db
            .flush_check(&[DomainUpdate {
                id: 12345,
                is_registered: false,
                expiry_date: None,
            }])
            .await
            .unwrap();
        assert_eq!(outcome.rows_written, 0);
        assert!(outcome.transitions.is_empty());
    }

    #[tokio::test]
    async fn existing_returns_only_tracked_names() {
        let db = db().await;
        db.flush_import(&[registered("a.test", "2026-01-01")], None)
            .await
            .unwrap();

        let names = vec!["a.test".to_string(), "b.test".to_string()];
        let found = db.existing(&names).await.unwrap();
        assert!(found.contains("a.test"));
        assert!(!found.contains("b.test"));
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn expiring_and_stale_selection() {
        let db = db().await;
        db.flush_import(
            &[
                registered("expired.test", "2020-01-01"),
                registered("current.test", "2099-01-01"),
            ],
            None,
        )
        .await
        .unwrap();

        let today = Utc::now().date_naive();
        let expiring = db.expiring_domain_ids(today).await.unwrap();
        assert_eq!(expiring.len(), 1);
        let expired = db.domain(expiring[0]).await.unwrap();
        assert_eq!(expired.name, "expired.test");

        // Both rows were just checked, so nothing is stale yet.
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        assert!(db.stale_domain_ids(cutoff, 10).await.unwrap().is_empty());

        // Everything is stale against a future cutoff.
        let cutoff = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(db.stale_domain_ids(cutoff, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_paths_report_missing_rows() {
        let db = db().await;
        assert!(matches!(
            db.delete_job(1).await,
            Err(SentryError::JobNotFound(1))
        ));
        assert!(matches!(
            db.delete_domain(1).await,
            Err(SentryError::DomainNotFound(1))
        ));

        let job = db.create_job(None, &import_payload(1)).await.unwrap();
        db.delete_job(job.id).await.unwrap();
        assert!(db.job(job.id).await.is_err());
    }

    #[tokio::test]
    async fn empty_job_completes_via_idempotent_finish() {
        let db = db().await;
        let job = db
            .create_job(None, &JobPayload::Import(Vec::new()))
            .await
            .unwrap();
        assert!(db.claim(job.id, 100).await.unwrap().is_none());
        let done = db.finish_batch(job.id, 0).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }
}
