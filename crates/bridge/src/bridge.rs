//! The protocol translator and lifecycle driver.
//!
//! One [`StdioBridge`] owns one child tool server. Everything between an HTTP
//! handler and the child's stdio happens here: correlation-ID allocation, the
//! pending-reply map, the discovery handshake, reply decoding, and the
//! supervision loop that restarts a dead child with bounded backoff.

use crate::backend::{BridgeStatus, Lifecycle, ToolBackend};
use crate::config::{BridgeConfig, BridgeSettings};
use crate::error::{BridgeError, Result};
use crate::protocol::{self, Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::registry::{ToolDescriptor, ToolRegistry};
use crate::supervisor::{self, ChildProcess, ChildSpec};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Why a child incarnation's stream ended.
#[derive(Debug)]
enum ChildEvent {
    /// stdout closed: the process exited or was killed.
    Exited { generation: u64 },
    /// A frame blew past the size cap; the stream can no longer be trusted.
    Desynced { generation: u64 },
}

impl ChildEvent {
    fn generation(&self) -> u64 {
        match self {
            ChildEvent::Exited { generation } | ChildEvent::Desynced { generation } => *generation,
        }
    }
}

#[derive(Debug, Default)]
struct Health {
    pid: Option<u32>,
    restart_count: u32,
    last_restart: Option<DateTime<Utc>>,
}

struct Inner {
    spec: ChildSpec,
    settings: BridgeSettings,
    registry: ToolRegistry,

    /// In-flight calls keyed by correlation ID. Dropping a sender wakes its
    /// waiter with an unavailability error.
    pending: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicU64,

    /// Held across write+flush so frames from concurrent callers never
    /// interleave on the child's stdin.
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Option<Child>>,

    state: RwLock<Lifecycle>,
    /// Bumped per child incarnation; events from stale readers are ignored.
    generation: AtomicU64,
    health: RwLock<Health>,
    events_tx: mpsc::UnboundedSender<ChildEvent>,
}

/// Handle to the running bridge. Cheap to clone via [`Arc`].
pub struct StdioBridge {
    inner: Arc<Inner>,
}

impl StdioBridge {
    /// Spawn the child, run discovery, and hand back a bridge in `Ready`
    /// state with its supervision task running.
    pub async fn start(config: BridgeConfig) -> Result<Arc<Self>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            spec: config.server,
            settings: config.bridge,
            registry: ToolRegistry::default(),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stdin: tokio::sync::Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
            state: RwLock::new(Lifecycle::Starting),
            generation: AtomicU64::new(0),
            health: RwLock::new(Health::default()),
            events_tx,
        });

        start_child(&inner).await?;
        inner.set_state(Lifecycle::Ready);
        tokio::spawn(supervise(inner.clone(), events_rx));

        Ok(Arc::new(Self { inner }))
    }

    /// Graceful shutdown: stop accepting work, close the child's stdin, give
    /// it the configured grace period, then kill it.
    pub async fn stop(&self) {
        self.inner.set_state(Lifecycle::Stopped);
        self.inner.teardown_child(true).await;
    }
}

#[async_trait]
impl ToolBackend for StdioBridge {
    fn state(&self) -> Lifecycle {
        self.inner.state()
    }

    fn status(&self) -> BridgeStatus {
        let health = self.inner.health.read();
        BridgeStatus {
            state: self.inner.state(),
            pid: health.pid,
            tool_count: self.inner.registry.len(),
            restart_count: health.restart_count,
            last_restart: health.last_restart,
        }
    }

    fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.inner.registry.list()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let state = self.inner.state();
        if state != Lifecycle::Ready {
            return Err(BridgeError::Unavailable { state });
        }
        let tool = self
            .inner
            .registry
            .get(name)
            .ok_or_else(|| BridgeError::UnknownTool(name.to_string()))?;
        crate::validate::validate_arguments(&tool, &arguments)?;

        let reply = self
            .inner
            .request(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
                self.inner.settings.request_timeout(),
            )
            .await?;
        decode_call_reply(name, reply)
    }
}

impl Inner {
    fn state(&self) -> Lifecycle {
        *self.state.read()
    }

    fn set_state(&self, state: Lifecycle) {
        *self.state.write() = state;
    }

    /// Send one request and wait for its correlated reply.
    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let frame = JsonRpcRequest::call(id, method, params);
        if let Err(e) = self.write_frame(&serde_json::to_value(&frame)?).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Sender dropped: the child went down and in-flight calls were flushed.
            Ok(Err(_)) => Err(BridgeError::Unavailable { state: self.state() }),
            Err(_) => {
                // A late reply for this id will be dropped as unmatched.
                self.pending.lock().remove(&id);
                Err(BridgeError::Timeout(timeout))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = JsonRpcNotification::new(method, params);
        self.write_frame(&serde_json::to_value(&frame)?).await
    }

    async fn write_frame(&self, frame: &Value) -> Result<()> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(BridgeError::Unavailable { state: self.state() });
        };
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Route one frame from the child's stdout.
    fn dispatch_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<Incoming>(line) {
            Ok(Incoming::Reply(reply)) => {
                let Some(id) = reply.id.as_u64() else {
                    tracing::warn!(id = %reply.id, "dropping reply with non-numeric id");
                    return;
                };
                let Some(tx) = self.pending.lock().remove(&id) else {
                    tracing::warn!(id, "dropping reply with no outstanding request");
                    return;
                };
                // The caller may have timed out and gone away; that's fine.
                let _ = tx.send(reply);
            }
            Ok(Incoming::Notification(note)) => {
                tracing::debug!(method = %note.method, "notification from tool server");
            }
            Ok(Incoming::Request(req)) => {
                // We advertise no client capabilities during initialize, so
                // there is nothing the server can legitimately ask of us.
                tracing::debug!(method = %req.method, "ignoring server-initiated request");
            }
            Err(e) => tracing::warn!(error = %e, "unparseable frame from tool server"),
        }
    }

    /// Abandon every in-flight call. Dropping the senders wakes each waiter.
    fn fail_pending(&self) {
        let mut pending = self.pending.lock();
        for (id, _tx) in pending.drain() {
            tracing::warn!(id, "abandoning in-flight call: tool server is down");
        }
    }

    async fn teardown_child(&self, graceful: bool) {
        // Dropping stdin closes the pipe; a well-behaved server exits on EOF.
        self.stdin.lock().await.take();
        let child = self.child.lock().await.take();
        self.health.write().pid = None;

        if let Some(mut child) = child {
            if graceful {
                supervisor::shutdown_child(child, self.settings.shutdown_grace()).await;
            } else {
                // Kill unconditionally; also reaps a child that already exited.
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "kill failed; child already gone");
                }
            }
        }
        self.fail_pending();
    }

    /// Discovery handshake: `initialize`, `notifications/initialized`,
    /// `tools/list`. Replaces the registry on success.
    async fn discover(&self) -> Result<usize> {
        let timeout = self.settings.discovery_timeout();

        let init = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": protocol::PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "portico-bridge",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
                timeout,
            )
            .await
            .map_err(as_discovery_error)?;
        if let Some(err) = init.error {
            return Err(BridgeError::Discovery(format!(
                "initialize rejected: {} (code {})",
                err.message, err.code
            )));
        }

        self.notify("notifications/initialized", None)
            .await
            .map_err(as_discovery_error)?;

        let listed = self
            .request("tools/list", json!({}), timeout)
            .await
            .map_err(as_discovery_error)?;
        if let Some(err) = listed.error {
            return Err(BridgeError::Discovery(format!(
                "tools/list rejected: {} (code {})",
                err.message, err.code
            )));
        }

        let tools_value = listed
            .result
            .as_ref()
            .and_then(|r| r.get("tools"))
            .cloned()
            .ok_or_else(|| BridgeError::Discovery("tools/list reply has no tools field".into()))?;
        let tools: Vec<ToolDescriptor> = serde_json::from_value(tools_value)
            .map_err(|e| BridgeError::Discovery(format!("malformed tools/list reply: {e}")))?;

        let count = tools.len();
        self.registry.replace(tools);
        Ok(count)
    }
}

fn as_discovery_error(e: BridgeError) -> BridgeError {
    match e {
        BridgeError::Discovery(_) => e,
        other => BridgeError::Discovery(other.to_string()),
    }
}

/// Spawn a child incarnation, wire its streams, and run discovery.
async fn start_child(inner: &Arc<Inner>) -> Result<()> {
    let spawned = ChildProcess::spawn(&inner.spec, inner.settings.max_frame_bytes)?;
    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

    let ChildProcess {
        child,
        pid,
        stdin,
        stdout,
    } = spawned;
    *inner.stdin.lock().await = Some(stdin);
    *inner.child.lock().await = Some(child);
    inner.health.write().pid = Some(pid);

    tokio::spawn(read_loop(inner.clone(), stdout, generation));

    match inner.discover().await {
        Ok(count) => {
            tracing::info!(pid, tools = count, "tool server ready");
            Ok(())
        }
        Err(e) => {
            inner.teardown_child(false).await;
            Err(e)
        }
    }
}

/// Consume the child's stdout until it closes or desynchronizes.
async fn read_loop(
    inner: Arc<Inner>,
    mut frames: FramedRead<ChildStdout, LinesCodec>,
    generation: u64,
) {
    loop {
        match frames.next().await {
            Some(Ok(line)) => inner.dispatch_line(&line),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::error!(
                    max_bytes = inner.settings.max_frame_bytes,
                    "oversized frame from tool server; stream is desynchronized"
                );
                let _ = inner.events_tx.send(ChildEvent::Desynced { generation });
                return;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                tracing::warn!(error = %e, "error reading tool server stdout");
                break;
            }
            None => break,
        }
    }
    let _ = inner.events_tx.send(ChildEvent::Exited { generation });
}

/// React to child deaths: fail fast, restart with bounded backoff, give up
/// into the terminal `Failed` state when the budget runs out.
async fn supervise(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<ChildEvent>) {
    while let Some(event) = events.recv().await {
        if event.generation() != inner.generation.load(Ordering::SeqCst) {
            continue; // stale reader from a replaced incarnation
        }
        match inner.state() {
            Lifecycle::Stopped | Lifecycle::Failed => continue,
            _ => {}
        }

        tracing::warn!(?event, "tool server connection lost");
        inner.set_state(Lifecycle::Degraded);
        inner.teardown_child(false).await;

        let policy = inner.settings.restart.clone();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if attempt > policy.maximum_attempts {
                tracing::error!(
                    attempts = policy.maximum_attempts,
                    "restart budget exhausted; gateway is failed"
                );
                inner.set_state(Lifecycle::Failed);
                return;
            }

            let delay = policy.delay(attempt);
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "restarting tool server");
            tokio::time::sleep(delay).await;
            if inner.state() == Lifecycle::Stopped {
                return;
            }

            match start_child(&inner).await {
                Ok(()) => {
                    {
                        let mut health = inner.health.write();
                        health.restart_count += 1;
                        health.last_restart = Some(Utc::now());
                    }
                    inner.set_state(Lifecycle::Ready);
                    tracing::info!(attempt, "tool server restarted");
                    break;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "restart attempt failed");
                }
            }
        }
    }
}

/// Decode a `tools/call` reply into the HTTP-facing payload.
fn decode_call_reply(tool: &str, reply: JsonRpcResponse) -> Result<Value> {
    if let Some(err) = reply.error {
        return Err(BridgeError::Upstream {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }
    let result = reply
        .result
        .ok_or_else(|| BridgeError::Protocol("reply carries neither result nor error".into()))?;

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        let message =
            first_text(&result).unwrap_or_else(|| "tool reported an error".to_string());
        return Err(BridgeError::ToolFailed {
            tool: tool.to_string(),
            message,
        });
    }

    Ok(render_result(result))
}

/// Prefer the structured payload; fall back to a lone text item (parsed as
/// JSON when it parses), then to the raw content list.
fn render_result(result: Value) -> Value {
    if let Some(structured) = result.get("structuredContent") {
        return structured.clone();
    }
    match result.get("content").and_then(Value::as_array) {
        Some(items) if items.len() == 1 => {
            if let Some(text) = items[0].get("text").and_then(Value::as_str) {
                return serde_json::from_str(text)
                    .unwrap_or_else(|_| Value::String(text.to_string()));
            }
            json!({ "content": items })
        }
        Some(items) => json!({ "content": items }),
        None => result,
    }
}

fn first_text(result: &Value) -> Option<String> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|c| c.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(body: Value) -> JsonRpcResponse {
        serde_json::from_value(body).unwrap()
    }

    fn test_inner() -> (Arc<Inner>, mpsc::UnboundedReceiver<ChildEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            spec: ChildSpec {
                command: "unused".into(),
                args: Vec::new(),
                env: HashMap::new(),
                working_dir: None,
            },
            settings: BridgeSettings::default(),
            registry: ToolRegistry::default(),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stdin: tokio::sync::Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
            state: RwLock::new(Lifecycle::Ready),
            generation: AtomicU64::new(1),
            health: RwLock::new(Health::default()),
            events_tx,
        });
        (inner, events_rx)
    }

    #[test]
    fn dispatch_completes_matching_pending_call() {
        let (inner, _rx) = test_inner();
        let (tx, mut rx) = oneshot::channel();
        inner.pending.lock().insert(5, tx);

        inner.dispatch_line(r#"{"jsonrpc":"2.0","id":5,"result":{"ok":true}}"#);

        let got = rx.try_recv().expect("reply delivered");
        assert_eq!(got.result.unwrap()["ok"], true);
        assert!(inner.pending.lock().is_empty());
    }

    #[test]
    fn unmatched_reply_is_dropped_without_disturbing_others() {
        let (inner, _rx) = test_inner();
        let (tx, mut rx) = oneshot::channel();
        inner.pending.lock().insert(5, tx);

        // Unknown id, non-numeric id, and garbage: all ignored.
        inner.dispatch_line(r#"{"jsonrpc":"2.0","id":99,"result":{}}"#);
        inner.dispatch_line(r#"{"jsonrpc":"2.0","id":"weird","result":{}}"#);
        inner.dispatch_line("not json at all");
        inner.dispatch_line("");

        assert!(rx.try_recv().is_err(), "pending call must stay outstanding");
        assert_eq!(inner.pending.lock().len(), 1);
    }

    #[test]
    fn fail_pending_wakes_every_waiter() {
        let (inner, _rx) = test_inner();
        let (tx_a, mut rx_a) = oneshot::channel();
        let (tx_b, mut rx_b) = oneshot::channel();
        inner.pending.lock().insert(1, tx_a);
        inner.pending.lock().insert(2, tx_b);

        inner.fail_pending();

        assert!(matches!(rx_a.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
        assert!(matches!(rx_b.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
        assert!(inner.pending.lock().is_empty());
    }

    #[test]
    fn decode_prefers_structured_content() {
        let out = decode_call_reply(
            "add",
            reply(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "content": [{ "type": "text", "text": "ignored" }],
                    "structuredContent": { "result": 5 }
                }
            })),
        )
        .unwrap();
        assert_eq!(out, json!({ "result": 5 }));
    }

    #[test]
    fn decode_parses_lone_text_content_as_json() {
        let out = decode_call_reply(
            "add",
            reply(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "content": [{ "type": "text", "text": "{\"result\":5}" }] }
            })),
        )
        .unwrap();
        assert_eq!(out, json!({ "result": 5 }));

        let plain = decode_call_reply(
            "echo",
            reply(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": { "content": [{ "type": "text", "text": "just words" }] }
            })),
        )
        .unwrap();
        assert_eq!(plain, json!("just words"));
    }

    #[test]
    fn decode_passes_multi_content_through() {
        let out = decode_call_reply(
            "render",
            reply(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": { "content": [
                    { "type": "text", "text": "a" },
                    { "type": "text", "text": "b" }
                ]}
            })),
        )
        .unwrap();
        assert_eq!(out["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn decode_maps_jsonrpc_error_to_upstream() {
        let err = decode_call_reply(
            "add",
            reply(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32602, "message": "bad params" }
            })),
        )
        .unwrap_err();
        assert!(matches!(err, BridgeError::Upstream { code: -32602, .. }), "got {err}");
    }

    #[test]
    fn decode_maps_is_error_result_to_tool_failure() {
        let err = decode_call_reply(
            "fail",
            reply(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "isError": true,
                    "content": [{ "type": "text", "text": "deliberate failure" }]
                }
            })),
        )
        .unwrap_err();
        match err {
            BridgeError::ToolFailed { tool, message } => {
                assert_eq!(tool, "fail");
                assert_eq!(message, "deliberate failure");
            }
            other => panic!("expected ToolFailed, got {other}"),
        }
    }

    #[test]
    fn decode_rejects_reply_with_neither_result_nor_error() {
        let malformed = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: json!(1),
            result: None,
            error: None,
        };
        let err = decode_call_reply("add", malformed).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)), "got {err}");
    }
}
