//! JSON-RPC 2.0 framing for the child tool-server protocol.
//!
//! The child speaks newline-delimited JSON over stdio: one message per line,
//! replies correlated to requests by `id`. Reference:
//! https://www.jsonrpc.org/specification

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// Standard JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Outbound request (bridge → child). `id` is the correlation ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,

    /// Correlation ID; unique among all outstanding requests.
    pub id: u64,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn call(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params: Some(params),
        }
    }
}

/// Outbound notification (no `id`, no reply expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Reply from the child. Exactly one of `result`/`error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    /// Echoes the request's correlation ID. Kept as a raw [`Value`] so a
    /// misbehaving child cannot break parsing with a string or null id.
    pub id: Value,

    /// `"result": null` deserializes to `Some(Value::Null)`, keeping an
    /// explicit null result distinct from an absent result field.
    #[serde(
        default,
        deserialize_with = "some_even_if_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn some_even_if_null<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Value::deserialize(deserializer)?))
}

/// JSON-RPC error object carried in an error reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A request initiated by the child (server → client direction).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcServerRequest {
    pub id: Value,

    pub method: String,

    #[serde(default)]
    pub params: Option<Value>,
}

/// One frame read from the child's stdout.
#[derive(Debug, Clone)]
pub enum Incoming {
    Reply(JsonRpcResponse),
    Request(JsonRpcServerRequest),
    Notification(JsonRpcNotification),
}

impl<'de> Deserialize<'de> for Incoming {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        // Reply: has "result" or "error" (and an "id").
        if value.get("result").is_some() || value.get("error").is_some() {
            return serde_json::from_value(value)
                .map(Incoming::Reply)
                .map_err(serde::de::Error::custom);
        }

        // Server-initiated request: has both "method" and "id".
        if value.get("method").is_some() && value.get("id").is_some() {
            return serde_json::from_value(value)
                .map(Incoming::Request)
                .map_err(serde::de::Error::custom);
        }

        // Notification: "method" without "id".
        if value.get("method").is_some() {
            return serde_json::from_value(value)
                .map(Incoming::Notification)
                .map_err(serde::de::Error::custom);
        }

        Err(serde::de::Error::custom(
            "invalid JSON-RPC message: neither reply nor request nor notification",
        ))
    }
}
