use crate::errors::SentryError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A tracked domain name. Rows are created by import or single-add and
/// mutated only by lookup completion; the pipeline never deletes them.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Domain {
    pub id: i64,
    pub name: String,
    pub expiry_date: Option<NaiveDate>,
    pub is_registered: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub added_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobKind {
    Import,
    WhoisCheck,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::WhoisCheck => "whois_check",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SentryError> {
        match s {
            "import" => Ok(JobKind::Import),
            "whois_check" => Ok(JobKind::WhoisCheck),
            other => Err(SentryError::UnknownJobKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One unit of bulk work. `payload` is immutable after creation and opaque
/// to everything but `JobPayload`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub user_id: Option<i64>,
    pub kind: JobKind,
    pub status: JobStatus,
    pub total: i64,
    pub processed: i64,
    pub errors: i64,
    #[serde(skip_serializing)]
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The discriminated payload behind the opaque `jobs.payload` column.
/// The tag lives in the `kind` column, so the column itself holds a bare
/// JSON array of names or of domain ids.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPayload {
    Import(Vec<String>),
    Check(Vec<i64>),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Import(_) => JobKind::Import,
            JobPayload::Check(_) => JobKind::WhoisCheck,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            JobPayload::Import(names) => names.len(),
            JobPayload::Check(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self) -> Result<String, SentryError> {
        let json = match self {
            JobPayload::Import(names) => serde_json::to_string(names)?,
            JobPayload::Check(ids) => serde_json::to_string(ids)?,
        };
        Ok(json)
    }

    pub fn decode(kind: JobKind, raw: &str) -> Result<Self, SentryError> {
        match kind {
            JobKind::Import => Ok(JobPayload::Import(serde_json::from_str(raw)?)),
            JobKind::WhoisCheck => Ok(JobPayload::Check(serde_json::from_str(raw)?)),
        }
    }

    /// The half-open `[start, end)` slice a claim reserved.
    pub fn slice(&self, start: usize, end: usize) -> JobPayload {
        match self {
            JobPayload::Import(names) => JobPayload::Import(names[start..end].to_vec()),
            JobPayload::Check(ids) => JobPayload::Check(ids[start..end].to_vec()),
        }
    }
}

/// Where a lookup answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupSource {
    Rdap,
    Whois,
    SynthesizedMiss,
}

/// Why a lookup produced no usable registration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupFailure {
    InvalidName,
    Network,
    Parse,
}

/// In-memory result of one name's lookup. Never persisted as-is; the flush
/// paths project it onto the `domains` row.
#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub name: String,
    pub is_registered: bool,
    pub expiry_date: Option<NaiveDate>,
    pub registrar: Option<String>,
    pub source: LookupSource,
    pub error: Option<LookupFailure>,
}

impl LookupResult {
    pub fn invalid(name: &str) -> Self {
        LookupResult {
            name: name.to_string(),
            is_registered: false,
            expiry_date: None,
            registrar: None,
            source: LookupSource::SynthesizedMiss,
            error: Some(LookupFailure::InvalidName),
        }
    }

    /// The under-approximation handed to names past the fallback cap.
    pub fn synthesized_miss(name: &str) -> Self {
        LookupResult {
            name: name.to_string(),
            is_registered: false,
            expiry_date: None,
            registrar: None,
            source: LookupSource::SynthesizedMiss,
            error: None,
        }
    }

    /// Whether this result counts toward the job's `errors` counter.
    /// Registry-negative answers and capped fallback misses do not.
    pub fn counts_as_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Fired on the registered -> available transition of a tracked domain.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub domain_id: i64,
    pub name: String,
    pub observed_at: DateTime<Utc>,
}

/// Normalize a raw user-supplied name to the canonical lowercase form the
/// store is keyed by. Accepts pasted URLs.
pub fn clean_name(raw: &str) -> Result<String, SentryError> {
    let mut name = raw.trim().to_lowercase();

    for prefix in ["https://", "http://"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest.to_string();
            break;
        }
    }
    if let Some(rest) = name.strip_prefix("www.") {
        name = rest.to_string();
    }
    // Pasted URLs carry paths and trailing slashes; everything after the
    // host is noise here.
    if let Some(idx) = name.find('/') {
        name.truncate(idx);
    }

    if name.is_empty()
        || name.len() > 253
        || !name.contains('.')
        || name.contains("..")
        || name.starts_with('.')
        || name.ends_with('.')
    {
        return Err(SentryError::InvalidDomain(raw.to_string()));
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_name_normalizes_pasted_urls() {
        assert_eq!(clean_name("Example.COM").unwrap(), "example.com");
        assert_eq!(clean_name("https://www.example.com/").unwrap(), "example.com");
        assert_eq!(clean_name("http://example.com/path/page").unwrap(), "example.com");
        assert_eq!(clean_name("  bar.test  ").unwrap(), "bar.test");
    }

    #[test]
    fn clean_name_rejects_dotless_and_malformed() {
        assert!(clean_name("foo").is_err());
        assert!(clean_name("").is_err());
        assert!(clean_name("a..b").is_err());
        assert!(clean_name(".example.com").is_err());
        assert!(clean_name("example.com.").is_err());
    }

    #[test]
    fn payload_round_trips_through_opaque_column() {
        let import = JobPayload::Import(vec!["a.com".into(), "b.net".into()]);
        let raw = import.encode().unwrap();
        assert_eq!(JobPayload::decode(JobKind::Import, &raw).unwrap(), import);

        let check = JobPayload::Check(vec![1, 2, 3]);
        let raw = check.encode().unwrap();
        assert_eq!(JobPayload::decode(JobKind::WhoisCheck, &raw).unwrap(), check);

        // Tag and column must agree; an import blob is not a valid id list.
        let import_raw = JobPayload::Import(vec!["a.com".into()]).encode().unwrap();
        assert!(JobPayload::decode(JobKind::WhoisCheck, &import_raw).is_err());
    }

    #[test]
    fn payload_slicing_is_half_open() {
        let p = JobPayload::Import(vec!["a.com".into(), "b.com".into(), "c.com".into()]);
        assert_eq!(
            p.slice(1, 3),
            JobPayload::Import(vec!["b.com".into(), "c.com".into()])
        );
        assert_eq!(p.slice(0, 0).len(), 0);
    }

    #[test]
    fn invalid_results_count_as_errors_but_misses_do_not() {
        assert!(LookupResult::invalid("foo").counts_as_error());
        assert!(!LookupResult::synthesized_miss("a.test").counts_as_error());
    }
}
