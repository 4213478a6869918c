//! The seam between the HTTP front-end and the child tool server.
//!
//! The front-end only ever sees this trait, so route handlers can be tested
//! against a fake backend without spawning processes.

use crate::error::Result;
use crate::registry::ToolDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Gateway lifecycle states.
///
/// `Starting → Ready`, then `Ready ⇄ Degraded` while restarts succeed.
/// `Failed` is terminal (restart budget exhausted); `Stopped` means a
/// deliberate shutdown is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Starting,
    Ready,
    Degraded,
    Failed,
    Stopped,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Starting => "starting",
            Lifecycle::Ready => "ready",
            Lifecycle::Degraded => "degraded",
            Lifecycle::Failed => "failed",
            Lifecycle::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Snapshot reported by `GET /health`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub state: Lifecycle,
    pub pid: Option<u32>,
    pub tool_count: usize,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_restart: Option<DateTime<Utc>>,
}

/// What the HTTP layer needs from whatever serves tool calls.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    fn state(&self) -> Lifecycle;

    fn status(&self) -> BridgeStatus;

    fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Run one tool call end to end: gate on lifecycle state, validate
    /// arguments, exchange frames with the child, decode the reply into the
    /// HTTP-facing payload.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}
