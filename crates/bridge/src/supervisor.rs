//! Process supervision for the child tool server.
//!
//! Owns the only handles to the child's stdio. No other module reads or
//! writes the raw streams; everything goes through the framed reader and the
//! stdin handle this module hands out, which keeps frames from interleaving.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::codec::{FramedRead, LinesCodec};

/// How to launch the child tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSpec {
    /// Executable to run.
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables (the parent environment is inherited).
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// A freshly spawned child with its stdio wired for line framing.
///
/// The caller takes the pieces apart: stdin goes behind the bridge's write
/// lock, the framed stdout into the reader task, the [`Child`] itself into
/// the slot the supervisor kills and reaps from.
#[derive(Debug)]
pub struct ChildProcess {
    pub child: Child,
    pub pid: u32,
    pub stdin: ChildStdin,
    pub stdout: FramedRead<ChildStdout, LinesCodec>,
}

impl ChildProcess {
    /// Spawn the child with piped stdio.
    ///
    /// Fails with a startup error if the executable cannot be launched or the
    /// process is already gone by the time we look at it. A child that dies a
    /// moment later is caught by discovery instead.
    pub fn spawn(spec: &ChildSpec, max_frame_bytes: usize) -> Result<Self> {
        tracing::info!(command = %spec.command, args = ?spec.args, "spawning tool server");

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::Startup(format!("failed to spawn '{}': {e}", spec.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Startup("failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Startup("failed to capture child stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::Startup("failed to capture child stderr".into()))?;

        if let Ok(Some(status)) = child.try_wait() {
            return Err(BridgeError::Startup(format!(
                "tool server exited immediately with {status}"
            )));
        }
        let pid = child
            .id()
            .ok_or_else(|| BridgeError::Startup("tool server exited immediately".into()))?;

        tokio::spawn(forward_stderr(stderr, pid));

        Ok(Self {
            child,
            pid,
            stdin,
            stdout: FramedRead::new(stdout, LinesCodec::new_with_max_length(max_frame_bytes)),
        })
    }
}

/// Child stderr lines go to our log so crashes leave a trace.
async fn forward_stderr(stderr: ChildStderr, pid: u32) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(pid, "tool server stderr: {line}");
    }
}

/// Wait out the grace period for a child whose stdin has been closed, then
/// kill it if it is still around.
pub async fn shutdown_child(mut child: Child, grace: Duration) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(%status, "tool server exited"),
        Ok(Err(e)) => tracing::warn!(error = %e, "error waiting for tool server exit"),
        Err(_) => {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "tool server ignored shutdown; killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill tool server");
            }
        }
    }
}

/// Bounded-backoff restart schedule applied after a child exit or desync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestartPolicy {
    /// Restart attempts allowed per outage before the gateway goes `Failed`.
    pub maximum_attempts: u32,
    /// Delay before the first restart attempt, milliseconds.
    pub initial_interval_ms: u64,
    /// Backoff multiplier applied per further attempt (typically >= 1.0).
    pub backoff_coefficient: f64,
    /// Optional cap on the delay between attempts, milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_interval_ms: Option<u64>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            maximum_attempts: 3,
            initial_interval_ms: 200,
            backoff_coefficient: 2.0,
            maximum_interval_ms: Some(5_000),
        }
    }
}

impl RestartPolicy {
    /// Delay before `attempt` (1-based); attempt 1 waits `initial_interval_ms`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(30);
        let coeff = self.backoff_coefficient;
        if !coeff.is_finite() || coeff <= 0.0 {
            return Duration::ZERO;
        }
        let mult = coeff.powi(i32::try_from(exp).unwrap_or(30));
        if !mult.is_finite() || mult <= 0.0 {
            return Duration::ZERO;
        }

        let mut d = Duration::from_millis(self.initial_interval_ms).mul_f64(mult);
        if let Some(max_ms) = self.maximum_interval_ms {
            d = d.min(Duration::from_millis(max_ms));
        }
        d
    }
}
