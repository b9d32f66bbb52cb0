//! Validation and normalization of raw crawl results
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. required fields present and string-shaped
//! 2. identifier non-empty
//! 3. URL parses as an absolute `http`/`https` URL with a host
//! 4. status is a known value
//! 5. timestamp is not ahead of `now` by more than the clock-skew tolerance
//! 6. payload is a mapping of scalars/sub-mappings under the size limit
//!
//! Validation is pure: the current time is an explicit argument of
//! [`Validator::validate_at`], so identical inputs always give identical results.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use url::{Host, Url};

use crate::error::{RecordField, ValidationError, ValidationReason};
use crate::record::{registrable_domain, CrawlResultRecord, CrawlStatus, RawRecord};

/// Default tolerance for timestamps slightly ahead of the local clock
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 300;

/// Default upper bound on the serialized payload size
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

const TIMESTAMP_KEYS: [&str; 2] = ["timestampObserved", "timestamp_observed"];

/// Tunable bounds of the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub clock_skew_secs: i64,
    pub max_payload_bytes: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Turns [`RawRecord`]s into [`CrawlResultRecord`]s
#[derive(Debug, Clone, Default)]
pub struct Validator {
    limits: ValidationLimits,
}

/// Required fields after the presence check, still unparsed
struct Candidate<'a> {
    identifier: &'a str,
    url: &'a str,
    status: &'a str,
    timestamp: &'a Value,
}

impl Validator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ValidationLimits {
        self.limits
    }

    /// Validate against the wall clock
    pub fn validate(&self, raw: &RawRecord) -> Result<CrawlResultRecord, ValidationError> {
        self.validate_at(raw, Utc::now())
    }

    pub fn validate_at(
        &self,
        raw: &RawRecord,
        now: DateTime<Utc>,
    ) -> Result<CrawlResultRecord, ValidationError> {
        let candidate = required_fields(raw)?;

        let identifier = candidate.identifier.trim();
        if identifier.is_empty() {
            return Err(ValidationError::new(
                RecordField::Identifier,
                ValidationReason::Empty,
            ));
        }

        let url = normalize_url(candidate.url)?;
        let status = normalize_status(candidate.status)?;
        let timestamp_observed = self.normalize_timestamp(candidate.timestamp, now)?;
        let payload = self.normalize_payload(raw.get("payload"))?;

        let domain = match payload.get("domain").and_then(Value::as_str).map(str::trim) {
            Some(domain) if !domain.is_empty() => domain.to_string(),
            _ => host_domain(&url),
        };

        Ok(CrawlResultRecord::new(
            identifier.to_string(),
            url,
            status,
            timestamp_observed,
            payload,
            domain,
        ))
    }

    fn normalize_timestamp(
        &self,
        value: &Value,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ValidationError> {
        let invalid = |shown: String| {
            ValidationError::new(
                RecordField::TimestampObserved,
                ValidationReason::InvalidTimestamp(shown),
            )
        };

        let parsed = match value {
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|_| invalid(s.clone()))?,
            Value::Number(n) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| invalid(n.to_string()))?,
            other => return Err(invalid(other.to_string())),
        };

        // millisecond precision keeps documents stable across round trips
        let parsed = DateTime::from_timestamp_millis(parsed.timestamp_millis())
            .ok_or_else(|| invalid(parsed.to_rfc3339()))?;

        let ahead_secs = (parsed - now).num_seconds();
        if ahead_secs > self.limits.clock_skew_secs {
            return Err(ValidationError::new(
                RecordField::TimestampObserved,
                ValidationReason::InFuture {
                    ahead_secs,
                    tolerance_secs: self.limits.clock_skew_secs,
                },
            ));
        }

        Ok(parsed)
    }

    fn normalize_payload(
        &self,
        value: Option<&Value>,
    ) -> Result<Map<String, Value>, ValidationError> {
        let payload = match value {
            None | Some(Value::Null) => return Ok(Map::new()),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(ValidationError::new(
                    RecordField::Payload,
                    ValidationReason::WrongType { expected: "object" },
                ))
            },
        };

        check_payload_values(payload, "payload")?;

        let size = serde_json::to_vec(payload)
            .map(|bytes| bytes.len())
            .map_err(|_| {
                ValidationError::new(
                    RecordField::Payload,
                    ValidationReason::UnsupportedValue {
                        path: "payload".to_string(),
                    },
                )
            })?;
        if size > self.limits.max_payload_bytes {
            return Err(ValidationError::new(
                RecordField::Payload,
                ValidationReason::TooLarge {
                    size,
                    limit: self.limits.max_payload_bytes,
                },
            ));
        }

        Ok(payload.clone())
    }
}

fn required_fields(raw: &RawRecord) -> Result<Candidate<'_>, ValidationError> {
    let identifier = required_str(raw, RecordField::Identifier, "identifier")?;
    let url = required_str(raw, RecordField::Url, "url")?;
    let status = required_str(raw, RecordField::Status, "status")?;

    let timestamp = TIMESTAMP_KEYS
        .iter()
        .filter_map(|key| raw.get(key))
        .find(|v| !v.is_null())
        .ok_or_else(|| {
            ValidationError::new(RecordField::TimestampObserved, ValidationReason::Missing)
        })?;
    if !(timestamp.is_string() || timestamp.is_number()) {
        return Err(ValidationError::new(
            RecordField::TimestampObserved,
            ValidationReason::WrongType {
                expected: "RFC 3339 string or epoch milliseconds",
            },
        ));
    }

    Ok(Candidate {
        identifier,
        url,
        status,
        timestamp,
    })
}

fn required_str<'a>(
    raw: &'a RawRecord,
    field: RecordField,
    key: &str,
) -> Result<&'a str, ValidationError> {
    match raw.get(key) {
        None | Some(Value::Null) => Err(ValidationError::new(field, ValidationReason::Missing)),
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(ValidationError::new(
            field,
            ValidationReason::WrongType { expected: "string" },
        )),
    }
}

fn normalize_url(input: &str) -> Result<Url, ValidationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ValidationError::new(RecordField::Url, ValidationReason::Empty));
    }

    let mut url = Url::parse(input).map_err(|e| {
        ValidationError::new(RecordField::Url, ValidationReason::InvalidUrl(e.to_string()))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::new(
            RecordField::Url,
            ValidationReason::UnsupportedScheme(url.scheme().to_string()),
        ));
    }

    match url.host() {
        None => {
            return Err(ValidationError::new(RecordField::Url, ValidationReason::MissingHost))
        },
        Some(Host::Domain(d)) if d.is_empty() => {
            return Err(ValidationError::new(RecordField::Url, ValidationReason::MissingHost))
        },
        Some(_) => {},
    }

    url.set_fragment(None);
    Ok(url)
}

fn normalize_status(input: &str) -> Result<CrawlStatus, ValidationError> {
    input
        .trim()
        .to_ascii_uppercase()
        .parse()
        .map_err(|_| {
            ValidationError::new(
                RecordField::Status,
                ValidationReason::UnknownStatus(input.to_string()),
            )
        })
}

fn host_domain(url: &Url) -> String {
    match url.host() {
        Some(Host::Domain(d)) => registrable_domain(d),
        Some(ip) => ip.to_string(),
        None => String::new(),
    }
}

fn check_payload_values(map: &Map<String, Value>, path: &str) -> Result<(), ValidationError> {
    for (key, value) in map {
        match value {
            Value::Array(_) => {
                return Err(ValidationError::new(
                    RecordField::Payload,
                    ValidationReason::UnsupportedValue {
                        path: format!("{path}.{key}"),
                    },
                ))
            },
            Value::Object(nested) => check_payload_values(nested, &format!("{path}.{key}"))?,
            _ => {},
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn raw(value: Value) -> RawRecord {
        RawRecord::from_value(value).unwrap()
    }

    fn valid() -> Value {
        json!({
            "identifier": "job-42",
            "url": "http://example.com/a",
            "status": "SUCCESS",
            "timestampObserved": "2026-10-19T11:59:00Z",
            "payload": {}
        })
    }

    fn with(field: &str, value: Value) -> RawRecord {
        let mut v = valid();
        v[field] = value;
        raw(v)
    }

    fn without(field: &str) -> RawRecord {
        let mut v = valid();
        v.as_object_mut().unwrap().remove(field);
        raw(v)
    }

    fn fail(raw: &RawRecord) -> ValidationError {
        Validator::default().validate_at(raw, now()).unwrap_err()
    }

    #[test]
    fn test_accepts_example_record() {
        let record = Validator::default().validate_at(&raw(valid()), now()).unwrap();
        assert_eq!(record.identifier(), "job-42");
        assert_eq!(record.url().as_str(), "http://example.com/a");
        assert_eq!(record.status(), CrawlStatus::Success);
        assert_eq!(record.domain(), "example.com");
        assert!(record.payload().is_empty());
    }

    #[test]
    fn test_empty_identifier() {
        let err = fail(&with("identifier", json!("")));
        assert_eq!(err.field, RecordField::Identifier);
        assert_eq!(err.reason, ValidationReason::Empty);
        assert_eq!(err.field.as_str(), "identifier");
        assert_eq!(err.reason.to_string(), "empty");
    }

    #[test]
    fn test_missing_fields_in_declared_order() {
        let err = fail(&raw(json!({})));
        assert_eq!(err.field, RecordField::Identifier);
        assert_eq!(err.reason, ValidationReason::Missing);

        let err = fail(&raw(json!({"identifier": ""})));
        assert_eq!(err.field, RecordField::Url);
        assert_eq!(err.reason, ValidationReason::Missing);

        assert_eq!(fail(&without("status")).field, RecordField::Status);
        assert_eq!(
            fail(&without("timestampObserved")).field,
            RecordField::TimestampObserved
        );
    }

    #[test]
    fn test_null_counts_as_missing() {
        let err = fail(&with("url", Value::Null));
        assert_eq!(err.field, RecordField::Url);
        assert_eq!(err.reason, ValidationReason::Missing);
    }

    #[test]
    fn test_presence_checked_before_identifier_content() {
        // both an empty identifier and a missing status: presence wins
        let mut v = valid();
        v["identifier"] = json!("");
        v.as_object_mut().unwrap().remove("status");
        let err = fail(&raw(v));
        assert_eq!(err.field, RecordField::Status);
    }

    #[test]
    fn test_wrong_shapes() {
        let err = fail(&with("identifier", json!(42)));
        assert_eq!(err.reason, ValidationReason::WrongType { expected: "string" });

        let err = fail(&with("timestampObserved", json!(true)));
        assert_eq!(err.field, RecordField::TimestampObserved);
        assert!(matches!(err.reason, ValidationReason::WrongType { .. }));

        let err = fail(&with("payload", json!("size=10")));
        assert_eq!(err.field, RecordField::Payload);
        assert_eq!(err.reason, ValidationReason::WrongType { expected: "object" });
    }

    #[test]
    fn test_url_rules() {
        let err = fail(&with("url", json!("/relative/path")));
        assert_eq!(err.field, RecordField::Url);
        assert!(matches!(err.reason, ValidationReason::InvalidUrl(_)));

        let err = fail(&with("url", json!("ftp://example.com/file")));
        assert_eq!(err.reason, ValidationReason::UnsupportedScheme("ftp".into()));

        let err = fail(&with("url", json!("   ")));
        assert_eq!(err.reason, ValidationReason::Empty);
    }

    #[test]
    fn test_url_normalization() {
        let record = Validator::default()
            .validate_at(&with("url", json!("  HTTP://WWW.Example.COM:80/a/./b#frag ")), now())
            .unwrap();
        assert_eq!(record.url().as_str(), "http://www.example.com/a/b");
        assert_eq!(record.domain(), "example.com");
    }

    #[test]
    fn test_ip_host_domain() {
        let record = Validator::default()
            .validate_at(&with("url", json!("https://10.0.0.7/status")), now())
            .unwrap();
        assert_eq!(record.domain(), "10.0.0.7");
    }

    #[test]
    fn test_payload_domain_wins() {
        let record = Validator::default()
            .validate_at(&with("payload", json!({"domain": "example.net"})), now())
            .unwrap();
        assert_eq!(record.domain(), "example.net");
    }

    #[test]
    fn test_status_normalization() {
        let record = Validator::default()
            .validate_at(&with("status", json!(" timeout ")), now())
            .unwrap();
        assert_eq!(record.status(), CrawlStatus::Timeout);

        let err = fail(&with("status", json!("DONE")));
        assert_eq!(err.field, RecordField::Status);
        assert_eq!(err.reason, ValidationReason::UnknownStatus("DONE".into()));
    }

    #[test]
    fn test_timestamp_formats() {
        let millis = now().timestamp_millis() - 1_500;
        let record = Validator::default()
            .validate_at(&with("timestampObserved", json!(millis)), now())
            .unwrap();
        assert_eq!(record.timestamp_observed().timestamp_millis(), millis);

        let record = Validator::default()
            .validate_at(&with("timestampObserved", json!("2026-10-19T13:30:00.123456+02:00")), now())
            .unwrap();
        assert_eq!(
            record.timestamp_observed(),
            Utc.with_ymd_and_hms(2026, 10, 19, 11, 30, 0).unwrap() + Duration::milliseconds(123)
        );

        let mut v = valid();
        let ts = v.as_object_mut().unwrap().remove("timestampObserved").unwrap();
        v["timestamp_observed"] = ts;
        assert!(Validator::default().validate_at(&raw(v), now()).is_ok());

        let err = fail(&with("timestampObserved", json!("yesterday")));
        assert_eq!(err.reason, ValidationReason::InvalidTimestamp("yesterday".into()));
    }

    #[test]
    fn test_future_timestamp_tolerance() {
        let within = (now() + Duration::seconds(DEFAULT_CLOCK_SKEW_SECS)).to_rfc3339();
        assert!(Validator::default()
            .validate_at(&with("timestampObserved", json!(within)), now())
            .is_ok());

        let beyond = (now() + Duration::seconds(DEFAULT_CLOCK_SKEW_SECS + 60)).to_rfc3339();
        let err = fail(&with("timestampObserved", json!(beyond)));
        assert_eq!(
            err.reason,
            ValidationReason::InFuture {
                ahead_secs: DEFAULT_CLOCK_SKEW_SECS + 60,
                tolerance_secs: DEFAULT_CLOCK_SKEW_SECS,
            }
        );
    }

    #[test]
    fn test_payload_size_limit() {
        let validator = Validator::new(ValidationLimits {
            max_payload_bytes: 64,
            ..ValidationLimits::default()
        });
        let big = json!({"error": "x".repeat(100)});
        let err = validator.validate_at(&with("payload", big), now()).unwrap_err();
        assert_eq!(err.field, RecordField::Payload);
        assert!(matches!(err.reason, ValidationReason::TooLarge { limit: 64, .. }));
    }

    #[test]
    fn test_payload_rejects_arrays() {
        let err = fail(&with("payload", json!({"meta": {"links": ["a", "b"]}})));
        assert_eq!(
            err.reason,
            ValidationReason::UnsupportedValue {
                path: "payload.meta.links".into()
            }
        );
    }

    #[test]
    fn test_missing_payload_is_empty() {
        let record = Validator::default().validate_at(&without("payload"), now()).unwrap();
        assert!(record.payload().is_empty());
    }

    proptest! {
        #[test]
        fn prop_validation_is_deterministic(
            id in "[a-z0-9-]{0,12}",
            path in "[a-z]{0,8}",
            status in prop::sample::select(vec!["SUCCESS", "failure", "Skipped", "TIMEOUT", "BOGUS"]),
            offset_secs in -100_000i64..1_000,
            size in 0u64..1_000_000,
        ) {
            let input = raw(json!({
                "identifier": id,
                "url": format!("https://crawl.example.com/{path}"),
                "status": status,
                "timestampObserved": (now() + Duration::seconds(offset_secs)).to_rfc3339(),
                "payload": {"size": size},
            }));
            let validator = Validator::default();
            let first = validator.validate_at(&input, now());
            let second = validator.validate_at(&input, now());
            prop_assert_eq!(&first, &second);

            if let Ok(record) = first {
                // re-validating the stored form changes nothing
                let again = raw(record.to_document().unwrap());
                prop_assert_eq!(validator.validate_at(&again, now()), Ok(record));
            }
        }
    }
}
