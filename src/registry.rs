//! TLD router: maps a domain name to the RDAP base URL for its TLD.
//!
//! Resolution order: process-local cache, static seed table, one-shot IANA
//! bootstrap registry. TLDs with no RDAP service are cached negatively for
//! the process lifetime, so after warmup `endpoint_for` does no I/O.

use crate::tld_table::SEED_RDAP_SERVERS;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
struct RdapBootstrap {
    services: Vec<RdapBootstrapEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct RdapBootstrapEntry {
    #[serde(rename = "0")]
    tlds: Vec<String>,
    #[serde(rename = "1")]
    servers: Vec<String>,
}

pub struct Registry {
    client: reqwest::Client,
    bootstrap_url: String,
    /// TLD -> resolved base URL; `None` records "no RDAP for this TLD".
    resolved: RwLock<HashMap<String, Option<String>>>,
    bootstrap: OnceCell<Option<RdapBootstrap>>,
}

impl Registry {
    pub fn new(bootstrap_url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("domain-sentry/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            bootstrap_url: bootstrap_url.to_string(),
            resolved: RwLock::new(HashMap::new()),
            bootstrap: OnceCell::new(),
        })
    }

    /// The last dot-label of a name. The bootstrap registry is keyed by
    /// bare TLDs, so multi-label public suffixes are intentionally not
    /// considered here.
    pub fn tld_of(name: &str) -> Option<&str> {
        name.rsplit('.').next().filter(|tld| !tld.is_empty())
    }

    /// RDAP base URL for a name's TLD, or `None` when the TLD has no RDAP
    /// service. Pure cache lookup after the first resolution of each TLD.
    pub async fn endpoint_for(&self, name: &str) -> Option<String> {
        let tld = Self::tld_of(name)?;

        if let Some(server) = SEED_RDAP_SERVERS.get(tld) {
            return Some((*server).to_string());
        }

        {
            let resolved = self.resolved.read().await;
            if let Some(entry) = resolved.get(tld) {
                return entry.clone();
            }
        }

        let endpoint = self.resolve_via_bootstrap(tld).await;
        let mut resolved = self.resolved.write().await;
        resolved.insert(tld.to_string(), endpoint.clone());
        endpoint
    }

    async fn resolve_via_bootstrap(&self, tld: &str) -> Option<String> {
        let bootstrap = self
            .bootstrap
            .get_or_init(|| async {
                match self.fetch_bootstrap().await {
                    Ok(data) => Some(data),
                    Err(e) => {
                        // Failure is cached for the process lifetime; the
                        // names route to the WHOIS fallback instead.
                        warn!("Failed to fetch RDAP bootstrap registry: {e}");
                        None
                    }
                }
            })
            .await
            .as_ref()?;

        for service in &bootstrap.services {
            if service.tlds.iter().any(|t| t == tld) {
                if let Some(server) = service.servers.first() {
                    let base = normalize_base_url(server);
                    info!("Resolved RDAP server for .{tld} via bootstrap: {base}");
                    return Some(base);
                }
            }
        }

        debug!("No RDAP service registered for TLD: {tld}");
        None
    }

    async fn fetch_bootstrap(&self) -> Result<RdapBootstrap, reqwest::Error> {
        debug!("Fetching RDAP bootstrap registry from {}", self.bootstrap_url);
        let response = self
            .client
            .get(&self.bootstrap_url)
            .send()
            .await?
            .error_for_status()?;
        let data: RdapBootstrap = response.json().await?;
        info!(
            "Cached RDAP bootstrap registry ({} service entries)",
            data.services.len()
        );
        Ok(data)
    }
}

/// Bootstrap entries are bare server URLs; the lookup path appends
/// `domain/{name}`, which needs a trailing slash to join cleanly.
fn normalize_base_url(server: &str) -> String {
    if server.ends_with('/') {
        server.to_string()
    } else {
        format!("{server}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tld_is_the_last_dot_label() {
        assert_eq!(Registry::tld_of("example.com"), Some("com"));
        assert_eq!(Registry::tld_of("a.b.co.uk"), Some("uk"));
        assert_eq!(Registry::tld_of("trailing."), None);
        assert_eq!(Registry::tld_of("nodot"), Some("nodot"));
    }

    #[test]
    fn base_urls_get_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://rdap.example.org"),
            "https://rdap.example.org/"
        );
        assert_eq!(
            normalize_base_url("https://rdap.example.org/"),
            "https://rdap.example.org/"
        );
    }

    #[tokio::test]
    async fn seeded_tlds_resolve_without_io() {
        let registry = Registry::new("http://invalid.localdomain/dns.json").unwrap();
        let endpoint = registry.endpoint_for("example.com").await;
        assert_eq!(
            endpoint.as_deref(),
            Some("https://rdap.verisign.com/com/v1/")
        );
    }

    #[test]
    fn bootstrap_document_parses_iana_shape() {
        let raw = r#"{
            "description": "RDAP bootstrap file for Domain Name System registrations",
            "services": [
                [["test", "example"], ["https://rdap.example.net/rdap"]]
            ],
            "version": "1.0"
        }"#;
        let parsed: RdapBootstrap = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.services.len(), 1);
        assert_eq!(parsed.services[0].tlds, vec!["test", "example"]);
        assert_eq!(parsed.services[0].servers[0], "https://rdap.example.net/rdap");
    }
}
