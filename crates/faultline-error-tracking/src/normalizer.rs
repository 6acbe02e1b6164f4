//! Event Normalizer
//!
//! Converts loosely typed SDK payloads into the canonical [`Event`]. Only
//! `event_id` and a well formed exception block are enforced; every other
//! field is extracted best-effort and falls back to a default.

use crate::event::{
    DeviceContext, Event, EventContexts, EventMinimal, ExceptionData, NamedVersion,
    RequestContext, UserContext,
};
use crate::fingerprint::full_fingerprint;
use chrono::Utc;
use faultline_core::{parse_flexible_timestamp, timestamp_from_unix_seconds, UtcDateTime};
use faultline_entities::types::{EventLevel, EventSource};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

const UNKNOWN: &str = "unknown";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Event payload must be a JSON object")]
    NotAnObject,
    #[error("Event is missing event_id")]
    MissingEventId,
    #[error("Malformed exception: {0}")]
    MalformedException(String),
}

/// Normalize a raw payload into a fully populated [`Event`] with its group hash
pub fn normalize_event(payload: &Value, project_id: i32) -> Result<Event, NormalizeError> {
    let obj = payload.as_object().ok_or(NormalizeError::NotAnObject)?;

    let event_id = match obj.get("event_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(NormalizeError::MissingEventId),
    };

    let core = normalize_core(obj)?;

    let mut event = Event {
        event_id,
        project_id,
        timestamp: extract_timestamp(obj.get("timestamp")),
        level: core.level,
        source: core.source,
        platform: core.platform,
        message: core.message,
        environment: string_or_unknown(obj.get("environment")),
        release: string_or_unknown(obj.get("release")),
        server_name: string_or_unknown(obj.get("server_name")),
        tags: extract_tags(obj.get("tags")),
        exception: core.exception,
        request: obj.get("request").and_then(extract_request),
        user: obj.get("user").and_then(extract_user),
        contexts: obj.get("contexts").map(extract_contexts).unwrap_or_default(),
        raw_payload: payload.to_string(),
        group_hash: Default::default(),
    };
    event.group_hash = full_fingerprint(&event);
    Ok(event)
}

/// Only the fingerprint-relevant fields. `event_id` is not required here.
pub fn normalize_minimal(payload: &Value) -> Result<EventMinimal, NormalizeError> {
    let obj = payload.as_object().ok_or(NormalizeError::NotAnObject)?;
    let core = normalize_core(obj)?;
    Ok(EventMinimal {
        level: core.level,
        source: core.source,
        platform: core.platform,
        message: core.message,
        exception: core.exception,
    })
}

struct CoreFields {
    level: EventLevel,
    source: EventSource,
    platform: String,
    message: String,
    exception: Option<ExceptionData>,
}

fn normalize_core(obj: &Map<String, Value>) -> Result<CoreFields, NormalizeError> {
    let explicit_level = obj.get("level").and_then(Value::as_str).map(parse_level);
    let exception = match obj.get("exception") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(extract_exception(raw)?),
    };

    let (source, level) = match (&exception, explicit_level) {
        (Some(_), Some(EventLevel::Fatal)) => (EventSource::Event, EventLevel::Fatal),
        (Some(_), _) => (EventSource::Exception, EventLevel::Exception),
        (None, level) => (EventSource::Event, level.unwrap_or(EventLevel::Error)),
    };

    let mut message = extract_message(obj);
    if message.is_empty() {
        if let Some(exception) = &exception {
            message = if exception.value.is_empty() {
                exception.exception_type.clone()
            } else {
                exception.value.clone()
            };
        }
    }

    Ok(CoreFields {
        level,
        source,
        platform: string_or_unknown(obj.get("platform")),
        message,
        exception,
    })
}

fn parse_level(raw: &str) -> EventLevel {
    let lowered = raw.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "warn" => EventLevel::Warning,
        other => EventLevel::from_str(other).unwrap_or(EventLevel::Error),
    }
}

fn extract_timestamp(raw: Option<&Value>) -> UtcDateTime {
    match raw {
        Some(Value::String(s)) => parse_flexible_timestamp(s),
        Some(Value::Number(n)) => n.as_f64().and_then(timestamp_from_unix_seconds),
        _ => None,
    }
    .unwrap_or_else(Utc::now)
}

fn string_or_unknown(raw: Option<&Value>) -> String {
    raw.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn opt_string(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `message` may be a plain string or an object carrying `formatted`/`message`;
/// Sentry style `logentry` is accepted as a fallback.
fn extract_message(obj: &Map<String, Value>) -> String {
    fn from_value(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(o) => o
                .get("formatted")
                .or_else(|| o.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        }
    }

    obj.get("message")
        .and_then(from_value)
        .or_else(|| obj.get("logentry").and_then(from_value))
        .unwrap_or_default()
}

fn extract_tags(raw: Option<&Value>) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    match raw {
        Some(Value::Object(map)) => {
            for (key, value) in map {
                if let Some(value) = tag_value(value) {
                    tags.insert(key.clone(), value);
                }
            }
        }
        // [["key", "value"], ...]
        Some(Value::Array(pairs)) => {
            for pair in pairs {
                if let Some([Value::String(key), value]) = pair.as_array().map(Vec::as_slice) {
                    if let Some(value) = tag_value(value) {
                        tags.insert(key.clone(), value);
                    }
                }
            }
        }
        _ => {}
    }
    tags
}

fn tag_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts a single exception object, `{"values": [...]}` or a bare list.
/// The first entry supplies type, value and stacktrace.
fn extract_exception(raw: &Value) -> Result<ExceptionData, NormalizeError> {
    let first = match raw {
        Value::Object(map) => match map.get("values") {
            Some(Value::Array(values)) => values.first(),
            _ => Some(raw),
        },
        Value::Array(values) => values.first(),
        _ => {
            return Err(NormalizeError::MalformedException(
                "exception must be an object or a list".to_string(),
            ))
        }
    };

    let first = first
        .and_then(Value::as_object)
        .ok_or_else(|| NormalizeError::MalformedException("no exception values".to_string()))?;

    let exception_type = first.get("type").and_then(Value::as_str).unwrap_or_default();
    let value = first.get("value").and_then(Value::as_str).unwrap_or_default();
    if exception_type.is_empty() && value.is_empty() {
        return Err(NormalizeError::MalformedException(
            "exception has neither type nor value".to_string(),
        ));
    }

    let stacktrace = first
        .get("stacktrace")
        .filter(|st| !st.is_null())
        .cloned();

    Ok(ExceptionData {
        exception_type: exception_type.to_string(),
        value: value.to_string(),
        stacktrace,
    })
}

fn extract_request(raw: &Value) -> Option<RequestContext> {
    let obj = raw.as_object()?;
    let mut headers = BTreeMap::new();
    match obj.get("headers") {
        Some(Value::Object(map)) => {
            for (key, value) in map {
                if let Some(value) = value.as_str() {
                    headers.insert(key.clone(), value.to_string());
                }
            }
        }
        Some(Value::Array(pairs)) => {
            for pair in pairs {
                if let Some([Value::String(key), Value::String(value)]) =
                    pair.as_array().map(Vec::as_slice)
                {
                    headers.insert(key.clone(), value.clone());
                }
            }
        }
        _ => {}
    }
    Some(RequestContext {
        url: opt_string(obj.get("url")),
        method: opt_string(obj.get("method")),
        query_string: opt_string(obj.get("query_string")),
        headers,
    })
}

fn extract_user(raw: &Value) -> Option<UserContext> {
    let obj = raw.as_object()?;
    Some(UserContext {
        id: opt_string(obj.get("id")),
        email: opt_string(obj.get("email")),
        username: opt_string(obj.get("username")),
        ip_address: opt_string(obj.get("ip_address")),
    })
}

fn extract_contexts(raw: &Value) -> EventContexts {
    let Some(obj) = raw.as_object() else {
        return EventContexts::default();
    };

    let named = |key: &str| {
        obj.get(key).and_then(Value::as_object).map(|o| NamedVersion {
            name: opt_string(o.get("name")),
            version: opt_string(o.get("version")),
        })
    };

    EventContexts {
        runtime: named("runtime"),
        os: named("os"),
        browser: named("browser"),
        device: obj
            .get("device")
            .and_then(Value::as_object)
            .map(|o| DeviceContext {
                family: opt_string(o.get("family")),
                model: opt_string(o.get("model")),
                arch: opt_string(o.get("arch")),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_event_id_is_required() {
        assert_eq!(
            normalize_event(&json!({"message": "boom"}), 1).unwrap_err(),
            NormalizeError::MissingEventId
        );
        assert_eq!(
            normalize_event(&json!({"event_id": "  "}), 1).unwrap_err(),
            NormalizeError::MissingEventId
        );
        assert_eq!(
            normalize_event(&json!([1, 2]), 1).unwrap_err(),
            NormalizeError::NotAnObject
        );
        // numeric ids are accepted
        assert_eq!(normalize_event(&json!({"event_id": 42}), 1).unwrap().event_id, "42");
    }

    #[test]
    fn test_defaults() {
        let event = normalize_event(&json!({"event_id": "1", "release": "  v1.2.0\n"}), 7).unwrap();
        assert_eq!(event.project_id, 7);
        assert_eq!(event.level, EventLevel::Error);
        assert_eq!(event.source, EventSource::Event);
        assert_eq!(event.platform, "unknown");
        assert_eq!(event.environment, "unknown");
        assert_eq!(event.server_name, "unknown");
        assert_eq!(event.release, "v1.2.0");
        assert!(event.tags.is_empty());
        assert!(event.exception.is_none());

        let blank = normalize_event(&json!({"event_id": "1", "release": "   "}), 7).unwrap();
        assert_eq!(blank.release, "unknown");
    }

    #[test]
    fn test_exception_promotes_source_and_level() {
        let event = normalize_event(
            &json!({"event_id": "1", "exception": {"type": "T", "value": "V"}}),
            1,
        )
        .unwrap();
        assert_eq!(event.source, EventSource::Exception);
        assert_eq!(event.level, EventLevel::Exception);
        assert_eq!(event.message, "V");
        assert_eq!(event.title(), "T: V");
    }

    #[test]
    fn test_fatal_overrides_exception_promotion() {
        let event = normalize_event(
            &json!({"event_id": "1", "level": "fatal", "exception": {"type": "T", "value": "V"}}),
            1,
        )
        .unwrap();
        assert_eq!(event.source, EventSource::Event);
        assert_eq!(event.level, EventLevel::Fatal);
        assert!(event.exception.is_some());
    }

    #[test]
    fn test_explicit_message_wins_over_exception_value() {
        let event = normalize_event(
            &json!({"event_id": "1", "message": "checkout failed", "exception": {"type": "T", "value": "V"}}),
            1,
        )
        .unwrap();
        assert_eq!(event.message, "checkout failed");
    }

    #[test]
    fn test_exception_shapes() {
        let list = normalize_event(
            &json!({"event_id": "1", "exception": [{"type": "A", "value": "first"}, {"type": "B", "value": "second"}]}),
            1,
        )
        .unwrap();
        assert_eq!(list.exception.unwrap().exception_type, "A");

        let values = normalize_event(
            &json!({"event_id": "1", "exception": {"values": [{"type": "C", "stacktrace": {"frames": []}}]}}),
            1,
        )
        .unwrap();
        let exception = values.exception.unwrap();
        assert_eq!(exception.exception_type, "C");
        assert_eq!(exception.value, "");
        assert_eq!(exception.stacktrace, Some(json!({"frames": []})));
        // falls back to the type when there is no value
        assert_eq!(values.message, "C");
    }

    #[test]
    fn test_malformed_exceptions() {
        for bad in [
            json!({"event_id": "1", "exception": {}}),
            json!({"event_id": "1", "exception": []}),
            json!({"event_id": "1", "exception": {"values": []}}),
            json!({"event_id": "1", "exception": "boom"}),
            json!({"event_id": "1", "exception": {"type": "", "value": ""}}),
        ] {
            assert!(
                matches!(
                    normalize_event(&bad, 1),
                    Err(NormalizeError::MalformedException(_))
                ),
                "expected malformed exception for {bad}"
            );
        }
    }

    #[test]
    fn test_level_parsing() {
        for (raw, expected) in [
            ("WARNING", EventLevel::Warning),
            ("warn", EventLevel::Warning),
            ("info", EventLevel::Info),
            ("debug", EventLevel::Debug),
            ("fatal", EventLevel::Fatal),
            ("critical", EventLevel::Error),
        ] {
            let event = normalize_event(&json!({"event_id": "1", "level": raw}), 1).unwrap();
            assert_eq!(event.level, expected, "level {raw}");
        }
    }

    #[test]
    fn test_timestamps() {
        let rfc = normalize_event(
            &json!({"event_id": "1", "timestamp": "2024-01-15T14:30:00Z"}),
            1,
        )
        .unwrap();
        assert_eq!(rfc.timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap());

        let unix = normalize_event(&json!({"event_id": "1", "timestamp": 1705329000}), 1).unwrap();
        assert_eq!(unix.timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap());

        let before = Utc::now();
        let garbage = normalize_event(&json!({"event_id": "1", "timestamp": "yesterday"}), 1).unwrap();
        assert!(garbage.timestamp >= before);
    }

    #[test]
    fn test_tags_and_contexts_best_effort() {
        let event = normalize_event(
            &json!({
                "event_id": "1",
                "tags": [["region", "eu"], ["attempt", 3], ["broken"], 17],
                "request": {"url": "https://example.com", "method": 5, "headers": {"Accept": "*/*", "X-Bad": 1}},
                "user": {"id": 99, "email": "dev@example.com", "username": null},
                "contexts": {
                    "runtime": {"name": "go", "version": "1.22"},
                    "os": "linux",
                    "device": {"arch": "arm64"}
                }
            }),
            1,
        )
        .unwrap();

        assert_eq!(event.tags.len(), 2);
        assert_eq!(event.tags["attempt"], "3");

        let request = event.request.as_ref().unwrap();
        assert_eq!(request.url.as_deref(), Some("https://example.com"));
        assert_eq!(request.method.as_deref(), Some("5"));
        assert_eq!(request.headers.len(), 1);

        let user = event.user.as_ref().unwrap();
        assert_eq!(user.id.as_deref(), Some("99"));
        assert!(user.username.is_none());

        assert_eq!(
            event.contexts.runtime.as_ref().unwrap().version.as_deref(),
            Some("1.22")
        );
        assert!(event.contexts.os.is_none());
        assert_eq!(
            event.contexts.device.as_ref().unwrap().arch.as_deref(),
            Some("arm64")
        );

        let stored = event.contexts_json();
        assert_eq!(stored["user"]["email"], "dev@example.com");
        assert_eq!(stored["runtime"]["name"], "go");
    }

    #[test]
    fn test_raw_payload_is_retained() {
        let payload = json!({"event_id": "1", "extra": {"nested": [1, 2, 3]}});
        let event = normalize_event(&payload, 1).unwrap();
        let stored: Value = serde_json::from_str(&event.raw_payload).unwrap();
        assert_eq!(stored, payload);
    }

    #[test]
    fn test_message_object_and_logentry() {
        let formatted = normalize_event(
            &json!({"event_id": "1", "message": {"formatted": "user 5 not found", "message": "user %s not found"}}),
            1,
        )
        .unwrap();
        assert_eq!(formatted.message, "user 5 not found");

        let logentry = normalize_event(
            &json!({"event_id": "1", "logentry": {"message": "from logentry"}}),
            1,
        )
        .unwrap();
        assert_eq!(logentry.message, "from logentry");
    }

    #[test]
    fn test_minimal_does_not_need_event_id() {
        let minimal = normalize_minimal(&json!({"message": "boom", "platform": "go"})).unwrap();
        assert_eq!(minimal.level, EventLevel::Error);
        assert_eq!(minimal.platform, "go");
        assert_eq!(minimal.message, "boom");
    }
}
