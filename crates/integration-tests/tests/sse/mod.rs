use std::time::Duration;

use futures_util::StreamExt;
use integration_tests::{TestServer, call_tool, next_message, read_until};
use serde_json::{Value, json};

use crate::SCRIPTED;

#[tokio::test]
async fn tool_notifications_reach_the_session_stream() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    let mut events = client.events(None).await;

    let response = client.call(&call_tool(1, "progress", json!({}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("progress sent"));

    let event = next_message(&mut events).await;
    assert_eq!(event.event, "message");
    assert_eq!(event.id, "1");

    let message: Value = serde_json::from_str(&event.data).unwrap();

    insta::assert_json_snapshot!(message, @r#"
    {
      "jsonrpc": "2.0",
      "method": "notifications/progress",
      "params": {
        "progress": 1,
        "progressToken": "p1"
      }
    }
    "#);
}

#[tokio::test]
async fn reconnect_replays_missed_events() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    client.call(&call_tool(1, "progress", json!({}))).await;
    client.call(&call_tool(2, "progress", json!({}))).await;

    let mut events = client.events(Some(1)).await;

    let replayed = next_message(&mut events).await;
    assert_eq!(replayed.id, "2");

    client.call(&call_tool(3, "progress", json!({}))).await;

    let live = next_message(&mut events).await;
    assert_eq!(live.id, "3");
}

#[tokio::test]
async fn replay_from_zero_returns_everything_buffered() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    for id in 1..=3 {
        client.call(&call_tool(id, "progress", json!({}))).await;
    }

    let mut events = client.events(Some(0)).await;

    for expected in ["1", "2", "3"] {
        assert_eq!(next_message(&mut events).await.id, expected);
    }
}

#[tokio::test]
async fn session_notifications_stay_in_their_session() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let mut first = server.mcp("acme", "notes");
    first.initialize().await;

    let mut second = server.mcp("acme", "notes");
    second.initialize().await;

    let mut events = second.events(None).await;

    first.call(&call_tool(1, "progress", json!({}))).await;
    first.call(&call_tool(2, "announce", json!({}))).await;

    let event = next_message(&mut events).await;
    let message: Value = serde_json::from_str(&event.data).unwrap();

    assert_eq!(message["method"], json!("notifications/message"));
    assert_eq!(message["params"]["data"], json!("hello from acme"));
}

#[tokio::test]
async fn broadcasts_stay_within_the_tenant() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let mut acme = server.mcp("acme", "notes");
    acme.initialize().await;

    let mut globex = server.mcp("globex", "notes");
    globex.initialize().await;

    let mut events = globex.events(None).await;

    acme.call(&call_tool(1, "announce", json!({}))).await;

    let leaked = tokio::time::timeout(Duration::from_millis(300), events.next()).await;
    assert!(leaked.is_err(), "globex received an acme broadcast: {leaked:?}");

    globex.call(&call_tool(1, "announce", json!({}))).await;

    let event = next_message(&mut events).await;
    let message: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(message["params"]["data"], json!("hello from globex"));
}

#[tokio::test]
async fn unknown_session_cannot_open_a_stream() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let response = server
        .client
        .request(reqwest::Method::GET, "/mcp/acme/notes")
        .header("mcp-session-id", "0123456789abcdef0123456789abcdef")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn idle_streams_carry_keepalive_comments() {
    let config = format!("{SCRIPTED}\n[gateway.sse]\nkeepalive = \"50ms\"\n");
    let (server, _) = TestServer::scripted(&config).await;

    let mut response = server.client.get("/mcp/acme/notes").await;
    assert_eq!(response.status(), 200);

    let raw = read_until(&mut response, "keepalive").await;

    assert!(raw.lines().filter(|line| line.contains("keepalive")).all(|line| line.starts_with(':')));
    assert!(!raw.lines().any(|line| line.starts_with("data:")), "{raw:?}");
}

#[tokio::test]
async fn inactive_tenants_cannot_open_a_stream() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    for path in ["/mcp/initech/notes", "/mcp/hooli/notes", "/mcp/umbrella/notes"] {
        let response = server.client.get(path).await;
        assert_eq!(response.status(), 404, "{path}");

        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"error": "Tenant or connector not found or inactive"}));
    }
}
