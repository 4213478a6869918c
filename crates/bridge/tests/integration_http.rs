mod common;

use anyhow::Context as _;
use common::{API_KEY, Gateway, math_server_config, post_tool, start_gateway};
use serde_json::{Value, json};

async fn math_gateway() -> anyhow::Result<Gateway> {
    start_gateway(&math_server_config(json!({}))).await
}

#[tokio::test]
async fn health_reports_ready_without_auth() -> anyhow::Result<()> {
    let gw = math_gateway().await?;

    let body: Value = reqwest::get(format!("{}/health", gw.base_url))
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["bridge"]["state"], "ready");
    assert_eq!(body["bridge"]["toolCount"], 6);
    assert_eq!(body["bridge"]["restartCount"], 0);
    Ok(())
}

#[tokio::test]
async fn tools_catalog_requires_auth_and_lists_discovered_schemas() -> anyhow::Result<()> {
    let gw = math_gateway().await?;
    let client = reqwest::Client::new();

    let unauthorized = client.get(format!("{}/tools", gw.base_url)).send().await?;
    assert_eq!(unauthorized.status().as_u16(), 401);

    let resp = client
        .get(format!("{}/tools", gw.base_url))
        .header("x-api-key", API_KEY)
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 200);

    let body: Value = resp.json().await?;
    let tools = body["tools"].as_array().context("tools array")?;
    assert_eq!(tools.len(), 6);

    let add = tools
        .iter()
        .find(|t| t["name"] == "add")
        .context("add declared")?;
    assert_eq!(add["description"], "Add two numbers together");
    assert_eq!(add["inputSchema"]["required"], json!(["a", "b"]));
    assert_eq!(add["inputSchema"]["properties"]["a"]["type"], "number");
    Ok(())
}

#[tokio::test]
async fn add_returns_the_sum() -> anyhow::Result<()> {
    let gw = math_gateway().await?;

    let (status, body) = post_tool(&gw.base_url, "add", Some(API_KEY), &json!({"a": 2, "b": 3})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!(5));
    assert_eq!(body["operation"], "addition");
    assert_eq!(body["details"], "2 + 3 = 5");

    let (status, body) =
        post_tool(&gw.base_url, "subtract", Some(API_KEY), &json!({"a": 2, "b": 3.5})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["result"], json!(-1.5));
    assert_eq!(body["operation"], "subtraction");
    Ok(())
}

#[tokio::test]
async fn requests_without_a_valid_key_never_reach_the_child() -> anyhow::Result<()> {
    let gw = math_gateway().await?;

    let (status, body) = post_tool(&gw.base_url, "whoami", Some(API_KEY), &json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["callCount"], 1);

    let (status, body) = post_tool(&gw.base_url, "add", None, &json!({"a": 1, "b": 2})).await?;
    assert_eq!(status, 401);
    assert_eq!(body["code"], "unauthorized");

    let (status, body) =
        post_tool(&gw.base_url, "add", Some("wrong-key"), &json!({"a": 1, "b": 2})).await?;
    assert_eq!(status, 401);
    assert_eq!(body["code"], "unauthorized");

    // The rejected calls left no trace on the child's call counter.
    let (status, body) = post_tool(&gw.base_url, "whoami", Some(API_KEY), &json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["callCount"], 2);
    Ok(())
}

#[tokio::test]
async fn bearer_token_is_accepted_too() -> anyhow::Result<()> {
    let gw = math_gateway().await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/whoami", gw.base_url))
        .header("authorization", format!("Bearer {API_KEY}"))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 200);
    Ok(())
}

#[tokio::test]
async fn undeclared_tool_name_is_404() -> anyhow::Result<()> {
    let gw = math_gateway().await?;

    let (status, body) =
        post_tool(&gw.base_url, "multiply", Some(API_KEY), &json!({"a": 2, "b": 3})).await?;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "unknown_tool");
    Ok(())
}

#[tokio::test]
async fn malformed_arguments_are_rejected_before_dispatch() -> anyhow::Result<()> {
    let gw = math_gateway().await?;

    let (status, body) =
        post_tool(&gw.base_url, "add", Some(API_KEY), &json!({"a": "two", "b": 3})).await?;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_arguments");
    assert!(
        body["violations"]
            .as_array()
            .context("violations array")?
            .iter()
            .any(|v| v["type"] == "constraint-violation"),
        "body: {body}"
    );

    let (status, body) = post_tool(&gw.base_url, "add", Some(API_KEY), &json!({"a": 1})).await?;
    assert_eq!(status, 400);
    assert!(
        body["violations"]
            .as_array()
            .context("violations array")?
            .iter()
            .any(|v| v["type"] == "missing-required-parameter" && v["parameter"] == "b"),
        "body: {body}"
    );

    let (status, body) =
        post_tool(&gw.base_url, "add", Some(API_KEY), &json!({"aa": 1, "b": 2})).await?;
    assert_eq!(status, 400);
    assert!(
        body["message"]
            .as_str()
            .context("message")?
            .contains("did you mean 'a'"),
        "body: {body}"
    );
    Ok(())
}

#[tokio::test]
async fn non_object_body_is_rejected() -> anyhow::Result<()> {
    let gw = math_gateway().await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/add", gw.base_url))
        .header("x-api-key", API_KEY)
        .body("[1,2]")
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "invalid_body");
    Ok(())
}

#[tokio::test]
async fn tool_reported_failure_maps_to_500() -> anyhow::Result<()> {
    let gw = math_gateway().await?;

    let (status, body) = post_tool(&gw.base_url, "fail", Some(API_KEY), &json!({})).await?;
    assert_eq!(status, 500);
    assert_eq!(body["code"], "tool_failed");
    assert_eq!(body["message"], "deliberate failure");
    Ok(())
}

#[tokio::test]
async fn concurrent_calls_all_get_their_own_answers() -> anyhow::Result<()> {
    let gw = math_gateway().await?;

    let calls = (0..8).map(|i| {
        let base = gw.base_url.clone();
        async move {
            let (status, body) =
                post_tool(&base, "add", Some(API_KEY), &json!({"a": i, "b": 100})).await?;
            anyhow::ensure!(status == 200, "status {status} for call {i}");
            anyhow::ensure!(body["result"] == json!(100 + i), "body {body} for call {i}");
            Ok(())
        }
    });
    for result in futures::future::join_all(calls).await {
        result?;
    }
    Ok(())
}
