//! Canonical event model produced by the normalizer

use faultline_core::UtcDateTime;
use faultline_entities::types::{EventLevel, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

const MAX_TITLE_CHARS: usize = 200;

/// Hex encoded SHA-1 grouping key
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupHash(String);

impl GroupHash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        GroupHash(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for GroupHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First exception of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionData {
    pub exception_type: String,
    pub value: String,
    pub stacktrace: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Name/version pair used by the runtime, os and browser contexts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedVersion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContexts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<NamedVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<NamedVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<NamedVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceContext>,
}

/// One occurrence, immutable once normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub project_id: i32,
    pub timestamp: UtcDateTime,
    pub level: EventLevel,
    pub source: EventSource,
    pub platform: String,
    pub message: String,
    pub environment: String,
    pub release: String,
    pub server_name: String,
    pub tags: BTreeMap<String, String>,
    pub exception: Option<ExceptionData>,
    pub request: Option<RequestContext>,
    pub user: Option<UserContext>,
    pub contexts: EventContexts,
    /// The payload exactly as received, serialized
    pub raw_payload: String,
    pub group_hash: GroupHash,
}

impl Event {
    pub fn minimal(&self) -> EventMinimal {
        EventMinimal {
            level: self.level,
            source: self.source,
            platform: self.platform.clone(),
            message: self.message.clone(),
            exception: self.exception.clone(),
        }
    }

    /// Issue title: `Type: value` for exceptions, the message otherwise
    pub fn title(&self) -> String {
        let title = match (&self.source, &self.exception) {
            (EventSource::Exception, Some(exception)) if !exception.exception_type.is_empty() => {
                if exception.value.is_empty() {
                    exception.exception_type.clone()
                } else {
                    format!("{}: {}", exception.exception_type, exception.value)
                }
            }
            _ if self.message.is_empty() => "<unlabeled event>".to_string(),
            _ => self.message.clone(),
        };
        truncate_chars(&title, MAX_TITLE_CHARS)
    }

    /// Request/user/runtime contexts as one JSON object for storage
    pub fn contexts_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(request) = &self.request {
            map.insert("request".to_string(), to_value_or_null(request));
        }
        if let Some(user) = &self.user {
            map.insert("user".to_string(), to_value_or_null(user));
        }
        if let Value::Object(contexts) = to_value_or_null(&self.contexts) {
            map.extend(contexts);
        }
        Value::Object(map)
    }
}

/// Only the discriminating fields, for cheap duplicate checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMinimal {
    pub level: EventLevel,
    pub source: EventSource,
    pub platform: String,
    pub message: String,
    pub exception: Option<ExceptionData>,
}

fn to_value_or_null<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
