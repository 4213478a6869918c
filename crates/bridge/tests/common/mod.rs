use anyhow::Context as _;
use serde_json::Value;
use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;

pub use portico_test_support::{KillOnDrop, pick_unused_port, wait_http_ok, wait_json};

pub const API_KEY: &str = "test-secret";

pub fn math_server_bin() -> &'static str {
    env!("CARGO_BIN_EXE_portico-math-server")
}

/// Standard config: the math server as child, plus per-test bridge settings.
pub fn math_server_config(bridge: Value) -> Value {
    serde_json::json!({
        "bridge": bridge,
        "server": { "command": math_server_bin(), "args": [] }
    })
}

pub fn write_config(config: &Value) -> anyhow::Result<tempfile::NamedTempFile> {
    let yaml = serde_yaml::to_string(config).context("serialize config as yaml")?;
    let file = tempfile::NamedTempFile::new().context("create temp config")?;
    std::fs::write(file.path(), yaml).context("write temp config")?;
    Ok(file)
}

pub fn spawn_bridge(config_path: &Path, port: u16) -> anyhow::Result<Child> {
    let bin = env!("CARGO_BIN_EXE_portico-bridge");
    Command::new(bin)
        .arg("--config")
        .arg(config_path)
        .arg("--bind")
        .arg(format!("127.0.0.1:{port}"))
        .arg("--api-key")
        .arg(API_KEY)
        .arg("--log-level")
        .arg("info")
        .spawn()
        .context("spawn bridge")
}

pub struct Gateway {
    pub process: KillOnDrop,
    pub base_url: String,
    _config: tempfile::NamedTempFile,
}

/// Spawn the gateway binary against `config` and wait until `/health` answers.
pub async fn start_gateway(config: &Value) -> anyhow::Result<Gateway> {
    let file = write_config(config)?;
    let port = pick_unused_port()?;
    let process = KillOnDrop(spawn_bridge(file.path(), port)?);
    let base_url = format!("http://127.0.0.1:{port}");
    wait_http_ok(&format!("{base_url}/health"), Duration::from_secs(15)).await?;
    Ok(Gateway {
        process,
        base_url,
        _config: file,
    })
}

/// POST a tool call, returning (status, parsed JSON body).
pub async fn post_tool(
    base_url: &str,
    tool: &str,
    api_key: Option<&str>,
    body: &Value,
) -> anyhow::Result<(u16, Value)> {
    let client = reqwest::Client::new();
    let mut req = client.post(format!("{base_url}/{tool}")).json(body);
    if let Some(key) = api_key {
        req = req.header("x-api-key", key);
    }
    let resp = req.send().await.context("send tool call")?;
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    Ok((status, body))
}
