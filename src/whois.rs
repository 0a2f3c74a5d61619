//! Port-43 WHOIS fallback for names RDAP could not answer.
//!
//! The fallback is rate-sensitive and socket-heavy, so the lookup engine
//! runs it sequentially and caps it per batch; nothing here needs to be
//! fast, it needs to be tolerant of three decades of registry text formats.

use crate::errors::SentryError;
use crate::models::{LookupFailure, LookupResult, LookupSource};
use crate::registry::Registry;
use crate::tld_table::SEED_WHOIS_SERVERS;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::RwLock,
    time::timeout,
};
use tracing::debug;

const WHOIS_PORT: u16 = 43;
const IANA_WHOIS: &str = "whois.iana.org";
const MAX_RESPONSE_SIZE: usize = 256 * 1024;

// Ordered: registry-operator fields first, registrar-report fields after.
static EXPIRY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?im)^\s*registry expiry date\s*:\s*(.+)$",
        r"(?im)^\s*registrar registration expiration date\s*:\s*(.+)$",
        r"(?im)^\s*expiration date\s*:\s*(.+)$",
        r"(?im)^\s*expiry date\s*:\s*(.+)$",
        r"(?im)^\s*expires?(?:\s+on)?\s*:\s*(.+)$",
        r"(?im)^\s*paid-till\s*:\s*(.+)$",
        r"(?im)^\s*renewal date\s*:\s*(.+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static REGISTRAR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?im)^\s*registrar\s*:\s*(.+)$",
        r"(?im)^\s*registrar name\s*:\s*(.+)$",
        r"(?im)^\s*sponsoring registrar\s*:\s*(.+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static NO_MATCH_SENTINEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)no match|not found|no entries found|no data found|status:\s*(?:free|available)",
    )
    .expect("static regex")
});

pub struct WhoisClient {
    timeout: Duration,
    /// TLD -> server discovered via IANA referral, cached per process.
    referrals: RwLock<HashMap<String, String>>,
}

impl WhoisClient {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            referrals: RwLock::new(HashMap::new()),
        }
    }

    /// Query the TLD's WHOIS server and heuristically extract registration
    /// state. Network failures and barren responses are folded into the
    /// result's `error` field; the caller decides what counts as a job
    /// error.
    pub async fn lookup(&self, name: &str) -> LookupResult {
        let server = match self.server_for(name).await {
            Some(server) => server,
            // No WHOIS server either: nothing answers for this TLD, so the
            // name gets the synthesized miss rather than an error count.
            None => return LookupResult::synthesized_miss(name),
        };

        match self.raw_query(&server, name).await {
            Ok(raw) => parse_whois_text(name, &raw),
            Err(e) => {
                debug!("WHOIS query to {server} failed for {name}: {e}");
                network_failure(name)
            }
        }
    }

    async fn server_for(&self, name: &str) -> Option<String> {
        let tld = Registry::tld_of(name)?;

        if let Some(server) = SEED_WHOIS_SERVERS.get(tld) {
            return Some((*server).to_string());
        }

        {
            let referrals = self.referrals.read().await;
            if let Some(server) = referrals.get(tld) {
                return Some(server.clone());
            }
        }

        let server = self.discover_via_iana(tld).await?;
        self.referrals
            .write()
            .await
            .insert(tld.to_string(), server.clone());
        Some(server)
    }

    /// Ask the IANA root WHOIS for the TLD's registry server. The referral
    /// appears as a `whois:` line in the TLD record.
    async fn discover_via_iana(&self, tld: &str) -> Option<String> {
        let response = self.raw_query(IANA_WHOIS, tld).await.ok()?;
        for line in response.lines() {
            let line = line.trim();
            if let Some(rest) = line.to_lowercase().strip_prefix("whois:") {
                let server = rest.trim().to_string();
                if !server.is_empty() {
                    debug!("IANA referral for .{tld}: {server}");
                    return Some(server);
                }
            }
        }
        None
    }

    async fn raw_query(&self, server: &str, query: &str) -> Result<String, SentryError> {
        let mut stream = timeout(self.timeout, TcpStream::connect((server, WHOIS_PORT))).await??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {e}");
        }

        stream.write_all(format!("{query}\r\n").as_bytes()).await?;

        let mut response = Vec::new();
        let mut buffer = [0u8; 8192];
        loop {
            match timeout(self.timeout, stream.read(&mut buffer)).await? {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&buffer[..n]);
                    if response.len() > MAX_RESPONSE_SIZE {
                        return Err(SentryError::ResponseTooLarge);
                    }
                }
                Err(e) => return Err(SentryError::Io(e)),
            }
        }

        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}

impl Default for WhoisClient {
    fn default() -> Self {
        Self::new()
    }
}

fn network_failure(name: &str) -> LookupResult {
    LookupResult {
        name: name.to_string(),
        is_registered: false,
        expiry_date: None,
        registrar: None,
        source: LookupSource::Whois,
        error: Some(LookupFailure::Network),
    }
}

/// Apply the ordered field extractors to a raw WHOIS response.
///
/// Registered is decided by evidence: any extracted field, or the absence
/// of a no-match sentinel. A response with neither fields nor sentinel is
/// unparseable and reported as such.
pub fn parse_whois_text(name: &str, raw: &str) -> LookupResult {
    let expiry = EXPIRY_PATTERNS
        .iter()
        .find_map(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_whois_date(m.as_str()));

    let registrar = REGISTRAR_PATTERNS
        .iter()
        .find_map(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    let has_fields = expiry.is_some() || registrar.is_some();
    let no_match = NO_MATCH_SENTINEL.is_match(raw);

    if no_match && !has_fields {
        return LookupResult {
            name: name.to_string(),
            is_registered: false,
            expiry_date: None,
            registrar: None,
            source: LookupSource::Whois,
            error: None,
        };
    }

    if !has_fields {
        return LookupResult {
            name: name.to_string(),
            is_registered: false,
            expiry_date: None,
            registrar: None,
            source: LookupSource::Whois,
            error: Some(LookupFailure::Parse),
        };
    }

    LookupResult {
        name: name.to_string(),
        is_registered: true,
        expiry_date: expiry,
        registrar,
        source: LookupSource::Whois,
        error: None,
    }
}

/// Registry text carries dates in anything from RFC-3339 to `18-May-2025`.
fn parse_whois_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim().trim_end_matches('.');

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }

    let datetime_formats = ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%d %H:%M:%S"];
    for format in datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }

    let date_formats = [
        "%Y-%m-%d",
        "%d-%b-%Y",
        "%d %b %Y",
        "%Y/%m/%d",
        "%d.%m.%Y",
        "%Y.%m.%d",
    ];
    for format in date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    debug!("Unparseable WHOIS date: {raw}");
    None
}
