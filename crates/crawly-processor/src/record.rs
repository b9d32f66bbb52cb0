//! Crawl result record model
//!
//! [`RawRecord`] is what the feed hands over: an untyped field map.
//! [`CrawlResultRecord`] is the validated, normalized and immutable form that
//! the store persists. Only the validator (or a stored document) can produce one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::MalformedInputError;

/// Untyped field-to-value mapping as delivered by the external feed
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    fields: Map<String, Value>,
}

impl RawRecord {
    /// Accept any JSON object; anything else has no candidate fields
    pub fn from_value(value: Value) -> Result<Self, MalformedInputError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(MalformedInputError::new(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn from_json_line(line: &str) -> Result<Self, MalformedInputError> {
        serde_json::from_str(line)
            .map_err(|e| MalformedInputError::new(format!("invalid JSON: {e}")))
            .and_then(Self::from_value)
            .map_err(|e| e.with_raw(line))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Best-effort identifier for logs and reject bookkeeping, before validation
    pub fn identifier_hint(&self) -> Option<&str> {
        self.fields
            .get("identifier")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Outcome the crawler observed for a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlStatus {
    Success,
    Failure,
    Skipped,
    Timeout,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Success => "SUCCESS",
            CrawlStatus::Failure => "FAILURE",
            CrawlStatus::Skipped => "SKIPPED",
            CrawlStatus::Timeout => "TIMEOUT",
        }
    }
}

impl FromStr for CrawlStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(CrawlStatus::Success),
            "FAILURE" => Ok(CrawlStatus::Failure),
            "SKIPPED" => Ok(CrawlStatus::Skipped),
            "TIMEOUT" => Ok(CrawlStatus::Timeout),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated crawl result.
///
/// The serialized form is the stored document. It holds nothing but the
/// normalized input, so storing identical content twice yields an identical
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResultRecord {
    identifier: String,
    url: Url,
    status: CrawlStatus,
    timestamp_observed: DateTime<Utc>,
    payload: Map<String, Value>,
    domain: String,
}

impl CrawlResultRecord {
    pub(crate) fn new(
        identifier: String,
        url: Url,
        status: CrawlStatus,
        timestamp_observed: DateTime<Utc>,
        payload: Map<String, Value>,
        domain: String,
    ) -> Self {
        Self {
            identifier,
            url,
            status,
            timestamp_observed,
            payload,
            domain,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> CrawlStatus {
        self.status
    }

    pub fn timestamp_observed(&self) -> DateTime<Utc> {
        self.timestamp_observed
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Native document representation of the store
    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_document(document: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document)
    }
}

/// Registrable domain of a host name.
///
/// Keeps the last two labels, or the last three under a `co` second level
/// (`shop.example.co.uk` -> `example.co.uk`). Single-label hosts are returned as is.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    match labels.len() {
        0..=1 => host,
        n if n > 2 && labels[n - 2] == "co" => labels[n - 3..].join("."),
        n => labels[n - 2..].join("."),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> CrawlResultRecord {
        let mut payload = Map::new();
        payload.insert("contentType".into(), json!("text/html"));
        payload.insert("size".into(), json!(5120));
        CrawlResultRecord::new(
            "job-42".into(),
            Url::parse("http://example.com/a").unwrap(),
            CrawlStatus::Success,
            Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap(),
            payload,
            "example.com".into(),
        )
    }

    #[test]
    fn test_raw_record_requires_object() {
        assert!(RawRecord::from_json_line(r#"{"identifier":"a"}"#).is_ok());

        let err = RawRecord::from_json_line("[1, 2]").unwrap_err();
        assert!(err.reason.contains("an array"));

        let err = RawRecord::from_json_line("{not json").unwrap_err();
        assert!(err.reason.starts_with("invalid JSON"));
        assert_eq!(err.raw.as_deref(), Some("{not json"));
    }

    #[test]
    fn test_identifier_hint_ignores_blank_and_non_string() {
        let raw = RawRecord::from_value(json!({"identifier": "  job-1 "})).unwrap();
        assert_eq!(raw.identifier_hint(), Some("job-1"));

        let raw = RawRecord::from_value(json!({"identifier": "   "})).unwrap();
        assert_eq!(raw.identifier_hint(), None);

        let raw = RawRecord::from_value(json!({"identifier": 42})).unwrap();
        assert_eq!(raw.identifier_hint(), None);
    }

    #[test]
    fn test_document_shape() {
        let doc = sample().to_document().unwrap();
        assert_eq!(
            doc,
            json!({
                "identifier": "job-42",
                "url": "http://example.com/a",
                "status": "SUCCESS",
                "timestampObserved": "2026-10-19T08:30:00Z",
                "payload": {"contentType": "text/html", "size": 5120},
                "domain": "example.com",
            })
        );
    }

    #[test]
    fn test_document_restores_equal_record() {
        let record = sample();
        let restored = CrawlResultRecord::from_document(record.to_document().unwrap()).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn test_status_parsing_is_exact() {
        assert_eq!("TIMEOUT".parse::<CrawlStatus>(), Ok(CrawlStatus::Timeout));
        assert!("timeout".parse::<CrawlStatus>().is_err());
        assert!("DONE".parse::<CrawlStatus>().is_err());
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("www.example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.example.org."), "example.org");
        assert_eq!(registrable_domain("shop.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("localhost"), "localhost");
        assert_eq!(registrable_domain("WWW.Example.COM"), "example.com");
    }
}
