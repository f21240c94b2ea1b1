//! JSON-RPC 2.0 message types and classification.
//!
//! Both channels of the gateway (the upstream client and every backend child)
//! speak JSON-RPC 2.0, so classification lives here in core and operates on a
//! pre-parsed `serde_json::Value`. The codec hands each NDJSON line to
//! [`classify_frame`] to decide whether it is a request, response, or
//! notification before any routing happens.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// JSON-RPC 2.0 version constant.
pub const JSONRPC_VERSION: &str = "2.0";

// ─────────────────────────────────────────────────────────────────────────────
// Request IDs
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request ID.
///
/// The spec allows string or integer IDs and we preserve the exact type so
/// responses use the same representation as their request. If the client sends
/// `"id": 1`, it gets `"id": 1` back, never `"id": "1"`.
///
/// `"id": null` is valid (though unusual) and distinct from a missing `id`
/// field, which marks a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer ID (e.g. `"id": 1`).
    Number(i64),
    /// String ID (e.g. `"id": "abc-123"`).
    String(String),
    /// Explicit null ID.
    Null,
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Number(n) => n.as_i64().map(JsonRpcId::Number).ok_or_else(|| {
                serde::de::Error::custom("JSON-RPC ID must be integer, not float")
            }),
            Value::String(s) => Ok(JsonRpcId::String(s)),
            Value::Null => Ok(JsonRpcId::Null),
            _ => Err(serde::de::Error::custom(
                "JSON-RPC ID must be string, integer, or null",
            )),
        }
    }
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonRpcId::Number(n) => write!(f, "{n}"),
            JsonRpcId::String(s) => write!(f, "{s}"),
            JsonRpcId::Null => write!(f, "null"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 message classification.
///
/// Determined by presence/absence of `id` and `method`:
/// - Request: has both `id` and `method`
/// - Response: has `id` but no `method`
/// - Notification: has `method` but no `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcMessageKind {
    /// Has both `id` and `method`: a request expecting a response.
    Request { id: JsonRpcId, method: String },
    /// Has `id` but no `method`: a response to a previous request.
    Response { id: JsonRpcId },
    /// Has `method` but no `id`: a fire-and-forget notification.
    Notification { method: String },
}

/// Errors that can occur during message classification.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The `jsonrpc` field is absent.
    #[error("missing jsonrpc version field")]
    MissingVersion,
    /// The `jsonrpc` field is present but not `"2.0"`.
    #[error("unsupported jsonrpc version: {version}")]
    UnsupportedVersion { version: String },
    /// The `id` field is present but not a string, integer, or null.
    #[error("invalid id field")]
    InvalidId,
    /// The message has neither `id` nor `method`.
    #[error("message has neither id nor method")]
    Unclassifiable,
}

/// Classify a parsed JSON-RPC value without taking ownership.
///
/// Validates the `"jsonrpc": "2.0"` version field, then classifies based on
/// the `id` and `method` fields.
pub fn classify_frame(value: &Value) -> Result<JsonRpcMessageKind, ClassifyError> {
    match value.get("jsonrpc").and_then(|v| v.as_str()) {
        Some("2.0") => {}
        Some(v) => {
            return Err(ClassifyError::UnsupportedVersion {
                version: v.to_string(),
            });
        }
        None => return Err(ClassifyError::MissingVersion),
    }

    let id = value
        .get("id")
        .map(parse_id)
        .transpose()
        .map_err(|_| ClassifyError::InvalidId)?;
    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .map(String::from);

    match (id, method) {
        (Some(id), Some(method)) => Ok(JsonRpcMessageKind::Request { id, method }),
        (Some(id), None) => Ok(JsonRpcMessageKind::Response { id }),
        (None, Some(method)) => Ok(JsonRpcMessageKind::Notification { method }),
        (None, None) => Err(ClassifyError::Unclassifiable),
    }
}

/// Parse a JSON value into a `JsonRpcId`.
///
/// Accepts string, integer, or null. Rejects floats, booleans, arrays, objects.
fn parse_id(value: &Value) -> Result<JsonRpcId, ()> {
    match value {
        Value::Number(n) => n.as_i64().map(JsonRpcId::Number).ok_or(()),
        Value::String(s) => Ok(JsonRpcId::String(s.clone())),
        Value::Null => Ok(JsonRpcId::Null),
        _ => Err(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error objects and frame builders
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC 2.0 error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard or implementation-defined).
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Construct an error object with no attached data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Build a success response frame for `id` carrying `result`.
pub fn success_frame(id: &JsonRpcId, result: Value) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Build an error response frame.
///
/// `id` is `None` when the request id could not be recovered (parse errors),
/// in which case the frame carries `"id": null` per the JSON-RPC 2.0 spec.
pub fn error_frame(id: Option<&JsonRpcId>, error: JsonRpcError) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id.cloned().unwrap_or(JsonRpcId::Null),
        "error": error,
    })
}

/// Build a request frame.
pub fn request_frame(id: &JsonRpcId, method: &str, params: Option<Value>) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
    obj.insert("id".into(), serde_json::to_value(id).unwrap_or(Value::Null));
    obj.insert("method".into(), Value::String(method.into()));
    if let Some(p) = params {
        obj.insert("params".into(), p);
    }
    Value::Object(obj)
}

/// Build a notification frame (no id, no response expected).
pub fn notification_frame(method: &str, params: Option<Value>) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
    obj.insert("method".into(), Value::String(method.into()));
    if let Some(p) = params {
        obj.insert("params".into(), p);
    }
    Value::Object(obj)
}
