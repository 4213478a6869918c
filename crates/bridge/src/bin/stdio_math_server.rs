//! Arithmetic tool server used by the bridge's integration tests.
//!
//! Speaks newline-delimited JSON-RPC 2.0 over stdio directly, on purpose
//! without touching the bridge's production code paths. Besides `add` and
//! `subtract` it exposes probes the lifecycle tests need: `whoami` (instance
//! identity + call counter), `sleep` (deadline tests), `fail` (tool-reported
//! error), and `crash` (exit without replying).

use serde_json::json;
use std::io::{BufRead as _, Write};
use std::time::{SystemTime, UNIX_EPOCH};

fn main() -> anyhow::Result<()> {
    let mut state = ServerState::new();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if let Some(resp) = handle_line(&mut state, &line) {
            write_json_line(&mut stdout, &resp)?;
        }
    }

    Ok(())
}

struct ServerState {
    instance_id: String,
    pid: u32,
    call_count: u64,
}

impl ServerState {
    fn new() -> Self {
        let pid = std::process::id();
        let started_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self {
            instance_id: format!("{pid}-{started_ns}"),
            pid,
            call_count: 0,
        }
    }
}

fn handle_line(state: &mut ServerState, line: &str) -> Option<serde_json::Value> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let msg: serde_json::Value = serde_json::from_str(line).ok()?;
    handle_message(state, &msg)
}

fn handle_message(state: &mut ServerState, msg: &serde_json::Value) -> Option<serde_json::Value> {
    let method = msg.get("method").and_then(serde_json::Value::as_str)?;

    // Ignore notifications (no `id`).
    let id = msg.get("id")?.clone();

    match method {
        "initialize" => {
            let result = initialize_result(msg);
            Some(jsonrpc_ok(&id, &result))
        }
        "tools/list" => Some(jsonrpc_ok(&id, &tools_list_result())),
        "tools/call" => match tools_call_result(state, msg) {
            Ok(result) => Some(jsonrpc_ok(&id, &result)),
            Err(error) => Some(jsonrpc_err(&id, &error)),
        },
        _ => {
            let error = json!({ "code": -32601, "message": "method not found" });
            Some(jsonrpc_err(&id, &error))
        }
    }
}

fn initialize_result(msg: &serde_json::Value) -> serde_json::Value {
    let protocol_version = msg
        .get("params")
        .and_then(|p| p.get("protocolVersion"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("2024-11-05")
        .to_string();

    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": {} },
        "serverInfo": { "name": "portico-math-server", "version": "0" }
    })
}

fn number_schema(description: &str) -> serde_json::Value {
    json!({ "type": "number", "description": description })
}

fn tools_list_result() -> serde_json::Value {
    json!({
        "tools": [
            {
                "name": "add",
                "description": "Add two numbers together",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "a": number_schema("First number"),
                        "b": number_schema("Second number")
                    },
                    "required": ["a", "b"]
                }
            },
            {
                "name": "subtract",
                "description": "Subtract second number from first",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "a": number_schema("First number (minuend)"),
                        "b": number_schema("Second number (subtrahend)")
                    },
                    "required": ["a", "b"]
                }
            },
            {
                "name": "whoami",
                "description": "Return per-process instance info",
                "inputSchema": { "type": "object" }
            },
            {
                "name": "sleep",
                "description": "Block for the given number of milliseconds",
                "inputSchema": {
                    "type": "object",
                    "properties": { "ms": { "type": "integer" } },
                    "required": ["ms"]
                }
            },
            {
                "name": "fail",
                "description": "Always report a tool-level failure",
                "inputSchema": { "type": "object" }
            },
            {
                "name": "crash",
                "description": "Exit the process without replying",
                "inputSchema": { "type": "object" }
            }
        ]
    })
}

fn tools_call_result(
    state: &mut ServerState,
    msg: &serde_json::Value,
) -> Result<serde_json::Value, serde_json::Value> {
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));
    let name = params.get("name").and_then(serde_json::Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    state.call_count += 1;

    match name {
        "add" | "subtract" => {
            let (a, b) = number_args(&args)?;
            let (operation, result) = if name == "add" {
                ("addition", a + b)
            } else {
                ("subtraction", a - b)
            };
            let sign = if name == "add" { "+" } else { "-" };
            Ok(structured_result(json!({
                "operation": operation,
                "result": trim_number(result),
                "details": format!("{} {sign} {} = {}", fmt_number(a), fmt_number(b), fmt_number(result)),
            })))
        }
        "whoami" => Ok(structured_result(json!({
            "instanceId": state.instance_id,
            "pid": state.pid,
            "callCount": state.call_count,
        }))),
        "sleep" => {
            let ms = args.get("ms").and_then(serde_json::Value::as_u64).unwrap_or(0);
            std::thread::sleep(std::time::Duration::from_millis(ms));
            Ok(structured_result(json!({ "slept": ms })))
        }
        "fail" => Ok(json!({
            "content": [{ "type": "text", "text": "deliberate failure" }],
            "isError": true
        })),
        "crash" => std::process::exit(3),
        _ => Err(json!({ "code": -32601, "message": "unknown tool" })),
    }
}

fn number_args(args: &serde_json::Value) -> Result<(f64, f64), serde_json::Value> {
    let get = |key: &str| {
        args.get(key)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| json!({ "code": -32602, "message": format!("missing numeric argument '{key}'") }))
    };
    Ok((get("a")?, get("b")?))
}

/// Render integral values without a trailing `.0` so `2 + 3` comes back as `5`.
fn trim_number(v: f64) -> serde_json::Value {
    if v.fract() == 0.0 && v.abs() < 9e15 {
        json!(v as i64)
    } else {
        json!(v)
    }
}

fn fmt_number(v: f64) -> String {
    trim_number(v).to_string()
}

fn structured_result(payload: serde_json::Value) -> serde_json::Value {
    json!({
        "content": [{ "type": "text", "text": payload.to_string() }],
        "structuredContent": payload
    })
}

fn jsonrpc_ok(id: &serde_json::Value, result: &serde_json::Value) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn jsonrpc_err(id: &serde_json::Value, error: &serde_json::Value) -> serde_json::Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

fn write_json_line(stdout: &mut dyn Write, v: &serde_json::Value) -> anyhow::Result<()> {
    writeln!(stdout, "{}", serde_json::to_string(v)?)?;
    stdout.flush()?;
    Ok(())
}
