//! Error types for the bridge.

use crate::backend::Lifecycle;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the gateway.
///
/// Per-request failures (unknown tool, bad arguments, timeouts) are rendered
/// as HTTP error responses by the front-end; process-level failures (startup,
/// discovery, child exit) drive the lifecycle state machine.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The child tool server could not be launched.
    #[error("startup error: {0}")]
    Startup(String),

    /// Capability discovery failed, timed out, or returned garbage.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Request names a tool the child never declared.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// Arguments do not conform to the tool's declared input schema.
    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments {
        tool: String,
        message: String,
        violations: serde_json::Value,
    },

    /// The child is not in a state that can serve calls.
    #[error("tool server unavailable ({state})")]
    Unavailable { state: Lifecycle },

    /// No matching reply arrived within the per-request deadline.
    #[error("no reply within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// JSON-RPC error reply from the child.
    #[error("tool server error {code}: {message}")]
    Upstream {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The tool ran and reported failure (`isError` result).
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// Malformed or unexpected frames from the child.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
