//! Shared helpers for integration tests that drive a spawned gateway binary.

use anyhow::Context as _;
use std::net::TcpListener;
use std::process::Child;
use std::time::{Duration, Instant};

/// Kills the wrapped process on drop so failing tests don't leak children.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
    }
}

/// Pick an unused TCP port on localhost.
///
/// The port is not reserved; another process could still grab it before the
/// caller binds it. Good enough for tests.
///
/// # Errors
///
/// Returns an error if binding an ephemeral localhost port fails or if the
/// bound socket's local address cannot be read.
pub fn pick_unused_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

/// Poll an HTTP URL until it returns a success status (2xx/3xx).
///
/// # Errors
///
/// Returns an error if the timeout elapses before the endpoint answers with
/// a success status.
pub async fn wait_http_ok(url: &str, timeout_dur: Duration) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url}");
        }

        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    }
}

/// Poll an HTTP URL until its JSON body satisfies `pred`; returns that body.
///
/// Useful for waiting on state reported by a health endpoint (e.g. a gateway
/// coming back to `ready` after a child restart).
///
/// # Errors
///
/// Returns an error if the timeout elapses first.
pub async fn wait_json(
    url: &str,
    timeout_dur: Duration,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> anyhow::Result<serde_json::Value> {
    let client = reqwest::Client::new();
    let start = Instant::now();
    loop {
        if start.elapsed() > timeout_dur {
            anyhow::bail!("timed out waiting for {url} to satisfy predicate");
        }

        if let Ok(resp) = client.get(url).send().await
            && let Ok(body) = resp.json::<serde_json::Value>().await
            && pred(&body)
        {
            return Ok(body);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
