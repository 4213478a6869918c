//! Configuration file surface.
//!
//! One YAML file (camelCase keys) describing the child tool server and the
//! bridge's limits. Listener address, API key, and log settings come from the
//! CLI / environment instead, so the same file can be reused across
//! deployments.

use crate::supervisor::{ChildSpec, RestartPolicy};
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// The child tool server to wrap.
    pub server: ChildSpec,
}

impl BridgeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read config {}", path.display()))?;
        let cfg: Self =
            serde_yaml::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }
}

/// Limits and timings for the bridge itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Per-request deadline for tool calls, milliseconds.
    pub request_timeout_ms: u64,

    /// Deadline for each step of the startup discovery handshake, milliseconds.
    pub discovery_timeout_ms: u64,

    /// Hard cap on one frame from the child. Beyond this the stream is
    /// considered desynchronized and the child is restarted.
    pub max_frame_bytes: usize,

    /// Time a stopping child gets between stdin EOF and being killed, milliseconds.
    pub shutdown_grace_ms: u64,

    pub restart: RestartPolicy,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            discovery_timeout_ms: 5_000,
            max_frame_bytes: 4 * 1024 * 1024,
            shutdown_grace_ms: 3_000,
            restart: RestartPolicy::default(),
        }
    }
}

impl BridgeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
