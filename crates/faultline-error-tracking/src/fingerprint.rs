//! Grouping key derivation.
//!
//! The digest is SHA-1 over the discriminating fields joined with `.`:
//!
//! - `source = event`: `message.level.platform`
//! - `source = exception`: `type.value.stacktrace`, where the stacktrace is
//!   rendered as canonical JSON (object keys sorted at every depth) and an
//!   absent stacktrace contributes an empty string.
//!
//! Timestamp, tags, release, server name and request context never take part.

use crate::event::{Event, EventMinimal, ExceptionData, GroupHash};
use faultline_entities::types::{EventLevel, EventSource};
use serde_json::Value;
use sha1::{Digest, Sha1};

pub fn full_fingerprint(event: &Event) -> GroupHash {
    fingerprint_of(
        event.source,
        event.level,
        &event.platform,
        &event.message,
        event.exception.as_ref(),
    )
}

/// Same digest as [`full_fingerprint`] for the event the minimal view came from
pub fn minimal_fingerprint(event: &EventMinimal) -> GroupHash {
    fingerprint_of(
        event.source,
        event.level,
        &event.platform,
        &event.message,
        event.exception.as_ref(),
    )
}

fn fingerprint_of(
    source: EventSource,
    level: EventLevel,
    platform: &str,
    message: &str,
    exception: Option<&ExceptionData>,
) -> GroupHash {
    let components: [String; 3] = match (source, exception) {
        (EventSource::Exception, Some(exception)) => [
            exception.exception_type.clone(),
            exception.value.clone(),
            exception
                .stacktrace
                .as_ref()
                .map(canonical_json)
                .unwrap_or_default(),
        ],
        _ => [
            message.to_string(),
            level.as_str().to_string(),
            platform.to_string(),
        ],
    };

    let mut hasher = Sha1::new();
    hasher.update(components.join(".").as_bytes());
    GroupHash::from_hex(hex::encode(hasher.finalize()))
}

/// Serialize JSON with object keys sorted recursively, independent of the
/// map ordering the value was parsed with
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
