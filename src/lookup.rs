//! The lookup engine: massively parallel RDAP over a rolling window, with
//! a capped sequential WHOIS fallback for everything RDAP could not answer.
//!
//! The contract of `lookup_batch`: exactly one entry per unique input name,
//! no entry order, and the call returns only once every outstanding request
//! for the batch has terminated. The engine never touches storage.

use crate::errors::SentryError;
use crate::models::{LookupResult, LookupSource};
use crate::rdap::RdapDomain;
use crate::registry::Registry;
use crate::whois::WhoisClient;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[async_trait]
pub trait LookupEngine: Send + Sync {
    async fn lookup_batch(&self, names: &[String]) -> HashMap<String, LookupResult>;
}

/// Outcome of the RDAP pass for one name.
enum RdapOutcome {
    Done(LookupResult),
    Fallback(String),
}

/// Single-process engine: one rolling window of `concurrency` outstanding
/// RDAP requests. This is the normative implementation.
pub struct RollingWindowEngine {
    client: reqwest::Client,
    registry: Arc<Registry>,
    whois: Arc<WhoisClient>,
    concurrency: usize,
    fallback_cap: usize,
}

impl RollingWindowEngine {
    pub fn new(
        registry: Arc<Registry>,
        concurrency: usize,
        fallback_cap: usize,
    ) -> Result<Self, SentryError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("domain-sentry/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            registry,
            whois: Arc::new(WhoisClient::new()),
            concurrency,
            fallback_cap,
        })
    }

    async fn rdap_lookup(&self, name: &str) -> RdapOutcome {
        let endpoint = match self.registry.endpoint_for(name).await {
            Some(endpoint) => endpoint,
            // No RDAP for this TLD; the WHOIS pass decides.
            None => return RdapOutcome::Fallback(name.to_string()),
        };

        let url = match Url::parse(&endpoint).and_then(|base| base.join(&format!("domain/{name}"))) {
            Ok(url) => url,
            Err(e) => {
                debug!("Unusable RDAP base {endpoint} for {name}: {e}");
                return RdapOutcome::Fallback(name.to_string());
            }
        };
        let response = match self
            .client
            .get(url)
            .header("Accept", "application/rdap+json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("RDAP request failed for {name}: {e}");
                return RdapOutcome::Fallback(name.to_string());
            }
        };

        match response.status() {
            StatusCode::OK => match response.text().await {
                Ok(body) => match RdapDomain::parse(&body) {
                    Ok(domain) => RdapOutcome::Done(LookupResult {
                        name: name.to_string(),
                        is_registered: true,
                        expiry_date: domain.expiry_date(),
                        registrar: domain.registrar(),
                        source: LookupSource::Rdap,
                        error: None,
                    }),
                    Err(e) => {
                        debug!("Malformed RDAP body for {name}: {e}");
                        RdapOutcome::Fallback(name.to_string())
                    }
                },
                Err(e) => {
                    debug!("Failed to read RDAP body for {name}: {e}");
                    RdapOutcome::Fallback(name.to_string())
                }
            },
            // Authoritative: the registry has no such delegation.
            StatusCode::NOT_FOUND => RdapOutcome::Done(LookupResult {
                name: name.to_string(),
                is_registered: false,
                expiry_date: None,
                registrar: None,
                source: LookupSource::Rdap,
                error: None,
            }),
            status => {
                debug!("RDAP returned {status} for {name}");
                RdapOutcome::Fallback(name.to_string())
            }
        }
    }
}

#[async_trait]
impl LookupEngine for RollingWindowEngine {
    async fn lookup_batch(&self, names: &[String]) -> HashMap<String, LookupResult> {
        let mut results: HashMap<String, LookupResult> = HashMap::new();
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut queue: Vec<String> = Vec::new();

        // Dedup; dotless names are hard errors and never reach the network.
        for name in names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            if !name.contains('.') {
                results.insert(name.clone(), LookupResult::invalid(name));
            } else {
                queue.push(name.clone());
            }
        }

        // Rolling window: up to `concurrency` outstanding requests, a new
        // one issued each time one completes.
        let outcomes: Vec<RdapOutcome> = stream::iter(queue)
            .map(|name| async move { self.rdap_lookup(&name).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut fallback: Vec<String> = Vec::new();
        for outcome in outcomes {
            match outcome {
                RdapOutcome::Done(result) => {
                    metrics::counter!("sentry_lookups_total", "source" => "rdap").increment(1);
                    results.insert(result.name.clone(), result);
                }
                RdapOutcome::Fallback(name) => fallback.push(name),
            }
        }

        let (to_query, capped) = split_fallback(fallback, self.fallback_cap);
        if !capped.is_empty() {
            warn!(
                "WHOIS fallback cap reached; synthesizing misses for {} names",
                capped.len()
            );
        }

        // Sequential on purpose: registries rate-limit port 43 aggressively.
        for name in to_query {
            let result = self.whois.lookup(&name).await;
            metrics::counter!("sentry_lookups_total", "source" => "whois").increment(1);
            results.insert(name, result);
        }
        for name in capped {
            metrics::counter!("sentry_lookups_total", "source" => "synthesized").increment(1);
            results.insert(name.clone(), LookupResult::synthesized_miss(&name));
        }

        results
    }
}

/// Fallback names beyond the cap receive a synthesized miss instead of a
/// socket query, keeping batch latency bounded.
fn split_fallback(names: Vec<String>, cap: usize) -> (Vec<String>, Vec<String>) {
    let mut to_query = names;
    let capped = if to_query.len() > cap {
        to_query.split_off(cap)
    } else {
        Vec::new()
    };
    (to_query, capped)
}

/// Sharded engine: hash-partitions the input across several independent
/// rolling windows and merges the maps. Total concurrency is the sum of the
/// shards' windows; the public contract is identical to the single-window
/// engine.
pub struct ShardedEngine {
    shards: Vec<RollingWindowEngine>,
}

impl ShardedEngine {
    pub fn new(
        registry: Arc<Registry>,
        shards: usize,
        concurrency: usize,
        fallback_cap: usize,
    ) -> Result<Self, SentryError> {
        let shards = (0..shards.max(1))
            .map(|_| RollingWindowEngine::new(registry.clone(), concurrency, fallback_cap))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { shards })
    }

    fn shard_of(&self, name: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }
}

#[async_trait]
impl LookupEngine for ShardedEngine {
    async fn lookup_batch(&self, names: &[String]) -> HashMap<String, LookupResult> {
        let mut partitions: Vec<Vec<String>> = vec![Vec::new(); self.shards.len()];
        for name in names {
            partitions[self.shard_of(name)].push(name.clone());
        }

        let futures = self
            .shards
            .iter()
            .zip(partitions)
            .map(|(shard, partition)| async move { shard.lookup_batch(&partition).await });

        let mut merged = HashMap::new();
        for map in futures::future::join_all(futures).await {
            merged.extend(map);
        }
        merged
    }
}

/// Build the engine the configuration asks for.
pub fn build_engine(
    registry: Arc<Registry>,
    shards: usize,
    concurrency: usize,
    fallback_cap: usize,
) -> Result<Arc<dyn LookupEngine>, SentryError> {
    if shards > 1 {
        Ok(Arc::new(ShardedEngine::new(
            registry,
            shards,
            concurrency,
            fallback_cap,
        )?))
    } else {
        Ok(Arc::new(RollingWindowEngine::new(
            registry,
            concurrency,
            fallback_cap,
        )?))
    }
}
