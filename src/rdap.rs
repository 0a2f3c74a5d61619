//! RDAP (Registration Data Access Protocol) response parsing.
//!
//! The bulk pipeline stores parsed fields only, so this module types just
//! the pieces of an RDAP domain object it consumes: the event timeline for
//! the expiry date and the entity list for the registrar.

use chrono::{DateTime, Local, NaiveDate};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RdapDomain {
    pub events: Option<Vec<RdapEvent>>,
    pub entities: Option<Vec<RdapEntity>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RdapEvent {
    #[serde(rename = "eventAction")]
    pub event_action: Option<String>,
    #[serde(rename = "eventDate")]
    pub event_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RdapEntity {
    pub handle: Option<String>,
    pub roles: Option<Vec<String>>,
    #[serde(rename = "vcardArray")]
    pub vcard_array: Option<serde_json::Value>,
}

impl RdapDomain {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Expiry from the first `expiration` event, converted to a local
    /// calendar date. Registries publish RFC-3339 instants; the tracked
    /// field is a date, never a datetime.
    pub fn expiry_date(&self) -> Option<NaiveDate> {
        let events = self.events.as_ref()?;
        events
            .iter()
            .find(|e| e.event_action.as_deref() == Some("expiration"))
            .and_then(|e| e.event_date.as_deref())
            .and_then(parse_event_date)
    }

    /// Registrar from the first entity carrying the `registrar` role,
    /// preferring its vCard `fn` over the bare handle.
    pub fn registrar(&self) -> Option<String> {
        let entities = self.entities.as_ref()?;
        let entity = entities.iter().find(|e| {
            e.roles
                .as_ref()
                .is_some_and(|roles| roles.iter().any(|r| r == "registrar"))
        })?;

        entity
            .vcard_array
            .as_ref()
            .and_then(extract_vcard_fn)
            .or_else(|| entity.handle.clone())
    }
}

fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Local).date_naive())
}

/// Walk a jCard (RFC 7095) array for the `fn` property. The structure is
/// `["vcard", [["fn", {}, "text", "Registrar Name"], ...]]`.
fn extract_vcard_fn(vcard: &serde_json::Value) -> Option<String> {
    let items = vcard.as_array()?.get(1)?.as_array()?;
    for item in items {
        let parts = match item.as_array() {
            Some(parts) if parts.len() >= 4 => parts,
            _ => continue,
        };
        if parts.first().and_then(|p| p.as_str()) == Some("fn") {
            return parts
                .get(3)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(String::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn domain_from(value: serde_json::Value) -> RdapDomain {
        RdapDomain::parse(&value.to_string()).unwrap()
    }

    #[test]
    fn expiry_comes_from_first_expiration_event() {
        let domain = domain_from(json!({
            "objectClassName": "domain",
            "events": [
                {"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"},
                {"eventAction": "expiration", "eventDate": "2026-08-14T04:00:00Z"},
                {"eventAction": "expiration", "eventDate": "2030-01-01T00:00:00Z"}
            ]
        }));
        let expiry = domain.expiry_date().unwrap();
        assert_eq!(expiry.format("%Y").to_string(), "2026");
    }

    #[test]
    fn missing_expiration_event_yields_none() {
        let domain = domain_from(json!({
            "events": [
                {"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"}
            ]
        }));
        assert!(domain.expiry_date().is_none());

        let empty = domain_from(json!({"objectClassName": "domain"}));
        assert!(empty.expiry_date().is_none());
    }

    #[test]
    fn registrar_prefers_vcard_fn_over_handle() {
        let domain = domain_from(json!({
            "entities": [
                {
                    "roles": ["registrant"],
                    "handle": "WRONG"
                },
                {
                    "roles": ["registrar"],
                    "handle": "292",
                    "vcardArray": ["vcard", [
                        ["version", {}, "text", "4.0"],
                        ["fn", {}, "text", "MarkMonitor Inc."]
                    ]]
                }
            ]
        }));
        assert_eq!(domain.registrar().as_deref(), Some("MarkMonitor Inc."));
    }

    #[test]
    fn registrar_falls_back_to_handle() {
        let domain = domain_from(json!({
            "entities": [
                {"roles": ["registrar"], "handle": "292"}
            ]
        }));
        assert_eq!(domain.registrar().as_deref(), Some("292"));
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        assert!(RdapDomain::parse("not json").is_err());
        assert!(RdapDomain::parse("[1,2,3]").is_err());
    }
}
