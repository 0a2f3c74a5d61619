//! HTTP surface for jobs and domains. JSON in, JSON out; errors map to
//! statuses through `SentryError::into_response`. Authentication sits in
//! front of this service; handlers trust the `user_id` they are given.

use crate::config::Config;
use crate::db::Database;
use crate::errors::SentryError;
use crate::lookup::LookupEngine;
use crate::metrics;
use crate::models::{Domain, Job, JobKind, JobPayload};
use crate::notify::NotifierHandle;
use crate::pipeline::{self, process_batch};
use crate::retry::RetryPolicy;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub engine: Arc<dyn LookupEngine>,
    pub notifier: NotifierHandle,
    pub config: Arc<Config>,
    pub started: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/process", post(process_job))
        .route("/jobs/resume", post(resume_job))
        .route("/jobs/:id", get(get_job).delete(delete_job))
        .route("/domains", post(add_domain).get(list_domains))
        .route("/domains/:id", get(get_domain).delete(delete_domain))
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// For `whois_check`: check every domain the user tracks instead of an
    /// explicit id list.
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub user_id: Option<i64>,
}

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), SentryError> {
    let kind = JobKind::parse(&request.kind)?;

    let payload = match kind {
        JobKind::Import => {
            let names: Vec<String> =
                serde_json::from_value(request.payload.unwrap_or_else(|| serde_json::json!([])))?;
            JobPayload::Import(names)
        }
        JobKind::WhoisCheck if request.all => {
            JobPayload::Check(state.db.domain_ids_for_user(request.user_id).await?)
        }
        JobKind::WhoisCheck => {
            let ids: Vec<i64> =
                serde_json::from_value(request.payload.unwrap_or_else(|| serde_json::json!([])))?;
            JobPayload::Check(ids)
        }
    };

    let job = state.db.create_job(request.user_id, &payload).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, SentryError> {
    let jobs = state.db.recent_jobs(query.limit.clamp(1, 500)).await?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Job>, SentryError> {
    Ok(Json(state.db.job(id).await?))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, SentryError> {
    state.db.delete_job(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub job_id: i64,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    /// `processed`, `completed`, `contended`, or `failed`. On
    /// `contended` a concurrent caller owns the current slice; retry
    /// shortly.
    pub outcome: &'static str,
    pub job: Job,
}

/// Synchronously run one claim + lookup + flush cycle, so an active client
/// can drive a job to completion without a long-lived worker.
async fn process_job(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, SentryError> {
    let batch_size = request
        .batch_size
        .unwrap_or(state.config.batch_size)
        .clamp(1, 5000);

    let outcome = process_batch(
        &state.db,
        state.engine.as_ref(),
        &state.notifier,
        &RetryPolicy::storage(),
        request.job_id,
        batch_size,
    )
    .await?;

    Ok(Json(ProcessResponse {
        outcome: outcome.as_str(),
        job: outcome.job().clone(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub job_id: i64,
}

async fn resume_job(
    State(state): State<AppState>,
    Json(request): Json<ResumeRequest>,
) -> Result<Json<Job>, SentryError> {
    Ok(Json(state.db.resume_job(request.job_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddDomainRequest {
    pub name: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

async fn add_domain(
    State(state): State<AppState>,
    Json(request): Json<AddDomainRequest>,
) -> Result<(StatusCode, Json<Domain>), SentryError> {
    let domain = pipeline::add_domain(
        &state.db,
        state.engine.as_ref(),
        &state.notifier,
        &request.name,
        request.user_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(domain)))
}

#[derive(Debug, Deserialize)]
pub struct ListDomainsQuery {
    #[serde(default)]
    pub registered: Option<bool>,
    #[serde(default = "default_domain_limit")]
    pub limit: i64,
}

fn default_domain_limit() -> i64 {
    100
}

async fn list_domains(
    State(state): State<AppState>,
    Query(query): Query<ListDomainsQuery>,
) -> Result<Json<Vec<Domain>>, SentryError> {
    let domains = state
        .db
        .list_domains(query.registered, query.limit.clamp(1, 10_000))
        .await?;
    Ok(Json(domains))
}

async fn get_domain(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Domain>, SentryError> {
    Ok(Json(state.db.domain(id).await?))
}

async fn delete_domain(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, SentryError> {
    state.db.delete_domain(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use crate::test_support::{registered, FakeEngine};

    async fn state_with(engine: FakeEngine) -> AppState {
        AppState {
            db: Database::connect("sqlite::memory:").await.unwrap(),
            engine: Arc::new(engine),
            notifier: NotifierHandle::disconnected(),
            config: Arc::new(Config::default()),
            started: Instant::now(),
        }
    }

    fn import_request(names: &[&str]) -> CreateJobRequest {
        CreateJobRequest {
            kind: "import".to_string(),
            payload: Some(serde_json::json!(names)),
            all: false,
            user_id: None,
        }
    }

    #[tokio::test]
    async fn create_then_drive_a_job_through_process() {
        let state = state_with(FakeEngine::new(vec![
            registered("example.com", "2026-08-14"),
            crate::models::LookupResult::synthesized_miss("bar.test"),
        ]))
        .await;

        let (status, Json(job)) = create_job(
            State(state.clone()),
            Json(import_request(&["example.com", "foo", "bar.test"])),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.total, 3);
        assert_eq!(job.processed, 0);

        let Json(response) = process_job(
            State(state.clone()),
            Json(ProcessRequest {
                job_id: job.id,
                batch_size: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.outcome, "processed");
        assert_eq!(response.job.processed, 3);
        assert_eq!(response.job.errors, 1);
        assert_eq!(response.job.status, JobStatus::Completed);

        // A second cycle observes completion.
        let Json(response) = process_job(
            State(state.clone()),
            Json(ProcessRequest {
                job_id: job.id,
                batch_size: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.outcome, "completed");
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let state = state_with(FakeEngine::empty()).await;
        let result = create_job(
            State(state),
            Json(CreateJobRequest {
                kind: "mystery".to_string(),
                payload: None,
                all: false,
                user_id: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(SentryError::UnknownJobKind(_))));
    }

    #[tokio::test]
    async fn whois_check_all_collects_tracked_ids() {
        let state = state_with(FakeEngine::empty()).await;
        state
            .db
            .flush_import(
                &[registered("a.example", "2030-01-01"), registered("b.example", "2030-01-01")],
                None,
            )
            .await
            .unwrap();

        let (_, Json(job)) = create_job(
            State(state.clone()),
            Json(CreateJobRequest {
                kind: "whois_check".to_string(),
                payload: None,
                all: true,
                user_id: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(job.kind, JobKind::WhoisCheck);
        assert_eq!(job.total, 2);
    }

    #[tokio::test]
    async fn job_status_and_delete_round_trip() {
        let state = state_with(FakeEngine::empty()).await;
        let (_, Json(job)) =
            create_job(State(state.clone()), Json(import_request(&["a.example"])))
                .await
                .unwrap();

        let Json(fetched) = get_job(State(state.clone()), Path(job.id)).await.unwrap();
        assert_eq!(fetched.id, job.id);

        let Json(jobs) = list_jobs(
            State(state.clone()),
            Query(ListJobsQuery { limit: 10 }),
        )
        .await
        .unwrap();
        assert_eq!(jobs.len(), 1);

        let status = delete_job(State(state.clone()), Path(job.id)).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(matches!(
            get_job(State(state), Path(job.id)).await,
            Err(SentryError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn resume_returns_the_job_to_pending() {
        let state = state_with(FakeEngine::empty()).await;
        let (_, Json(job)) = create_job(
            State(state.clone()),
            Json(import_request(&["a.example", "b.example"])),
        )
        .await
        .unwrap();
        state.db.claim(job.id, 1).await.unwrap().unwrap();

        let Json(resumed) = resume_job(
            State(state),
            Json(ResumeRequest { job_id: job.id }),
        )
        .await
        .unwrap();
        assert_eq!(resumed.status, JobStatus::Pending);
        assert_eq!(resumed.processed, 1);
    }

    #[tokio::test]
    async fn domain_add_list_get_delete() {
        let state = state_with(FakeEngine::new(vec![registered("example.com", "2026-08-14")]))
            .await;

        let (status, Json(domain)) = add_domain(
            State(state.clone()),
            Json(AddDomainRequest {
                name: "https://www.Example.com/".to_string(),
                user_id: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(domain.name, "example.com");

        let Json(domains) = list_domains(
            State(state.clone()),
            Query(ListDomainsQuery {
                registered: Some(true),
                limit: 10,
            }),
        )
        .await
        .unwrap();
        assert_eq!(domains.len(), 1);

        let Json(fetched) = get_domain(State(state.clone()), Path(domain.id)).await.unwrap();
        assert_eq!(fetched.name, "example.com");

        let status = delete_domain(State(state.clone()), Path(domain.id)).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        // Invalid input maps to a 400-class error.
        assert!(matches!(
            add_domain(
                State(state),
                Json(AddDomainRequest {
                    name: "nodot".to_string(),
                    user_id: None
                })
            )
            .await,
            Err(SentryError::InvalidDomain(_))
        ));
    }

    #[test]
    fn router_builds_with_every_route() {
        // Compile-time shape check; handlers are exercised directly above.
        let _ = |state: AppState| router(state);
    }
}
