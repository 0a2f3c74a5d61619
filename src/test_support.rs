//! Shared helpers for the in-module test suites.

use crate::lookup::LookupEngine;
use crate::models::{LookupResult, LookupSource};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Engine stub: canned answers by name, authoritative 404 for anything
/// else. Mirrors the real engine's one-entry-per-unique-name contract.
pub struct FakeEngine {
    answers: HashMap<String, LookupResult>,
}

impl FakeEngine {
    pub fn new(answers: Vec<LookupResult>) -> Self {
        Self {
            answers: answers.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl LookupEngine for FakeEngine {
    async fn lookup_batch(&self, names: &[String]) -> HashMap<String, LookupResult> {
        let mut out = HashMap::new();
        for name in names {
            if out.contains_key(name) {
                continue;
            }
            if !name.contains('.') {
                out.insert(name.clone(), LookupResult::invalid(name));
                continue;
            }
            let result = self
                .answers
                .get(name)
                .cloned()
                .unwrap_or_else(|| not_registered(name));
            out.insert(name.clone(), result);
        }
        out
    }
}

pub fn registered(name: &str, expiry: &str) -> LookupResult {
    LookupResult {
        name: name.to_string(),
        is_registered: true,
        expiry_date: Some(expiry.parse::<NaiveDate>().unwrap()),
        registrar: Some("Example Registrar".to_string()),
        source: LookupSource::Rdap,
        error: None,
    }
}

pub fn not_registered(name: &str) -> LookupResult {
    LookupResult {
        name: name.to_string(),
        is_registered: false,
        expiry_date: None,
        registrar: None,
        source: LookupSource::Rdap,
        error: None,
    }
}
