//! # Domain Sentry
//!
//! A bulk domain-status pipeline: import tens of thousands of names, keep
//! their registration state fresh with massively parallel RDAP lookups
//! (WHOIS as a fallback), and push a notification the moment a tracked
//! name becomes available.
//!
//! ## Architecture
//!
//! - A persistent job queue (`import` and `whois_check` jobs) in SQLite
//! - Workers that atomically claim contiguous payload slices
//! - A lookup engine running a rolling window of concurrent RDAP requests
//! - Batched, transactional flushes with availability-transition detection
//! - A recurring scanner feeding due and stale domains back into the queue
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use domain_sentry::{lookup, Config, Database, LookupEngine, Registry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let db = Database::connect(&config.database_url).await?;
//!     let registry = Arc::new(Registry::new(&config.rdap_bootstrap_url)?);
//!     let engine = lookup::build_engine(registry, 1, config.concurrency, config.fallback_cap)?;
//!
//!     let names = vec!["example.com".to_string()];
//!     let results = engine.lookup_batch(&names).await;
//!     println!("{:?}", results.get("example.com"));
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod dialect;
pub mod errors;
pub mod lookup;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod rdap;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod tld_table;
pub mod whois;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the types most integrations touch.
pub use config::Config;
pub use db::Database;
pub use errors::SentryError;
pub use lookup::{LookupEngine, RollingWindowEngine, ShardedEngine};
pub use models::{Domain, Job, JobKind, JobPayload, JobStatus, LookupResult};
pub use registry::Registry;
