use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use integration_tests::{TestServer, call_tool, initialize, next_message, read_until};
use serde_json::{Value, json};

use crate::SCRIPTED;

#[tokio::test]
async fn endpoint_then_responses_on_the_stream() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let response = server.client.get("/mcp/acme/notes/sse").await;
    assert_eq!(response.status(), 200);

    let mut events = response
        .bytes_stream()
        .eventsource()
        .filter_map(|event| async move { event.ok() })
        .boxed();

    let endpoint = next_message(&mut events).await;
    assert_eq!(endpoint.event, "endpoint");
    assert!(endpoint.data.starts_with("/mcp/acme/notes/messages?sessionId="));

    let response = server.client.post(&endpoint.data, &initialize(1)).await;
    assert_eq!(response.status(), 202);

    let event = next_message(&mut events).await;
    let message: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(message["id"], json!(1));
    assert_eq!(message["result"]["protocolVersion"], json!("2025-06-18"));

    let response = server
        .client
        .post(&endpoint.data, &call_tool(2, "echo", json!({"text": "legacy"})))
        .await;

    assert_eq!(response.status(), 202);

    let event = next_message(&mut events).await;
    let message: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(message["result"]["content"][0]["text"], json!("legacy"));
}

#[tokio::test]
async fn unknown_stream_is_not_found() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let response = server
        .client
        .post("/mcp/acme/notes/messages?sessionId=nope", &initialize(1))
        .await;

    assert_eq!(response.status(), 404);

    let body: Value = response.json().await.unwrap();

    insta::assert_json_snapshot!(body, @r#"
    {
      "error": "Unknown SSE stream: nope"
    }
    "#);
}

#[tokio::test]
async fn stream_is_bound_to_its_tenant() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let response = server.client.get("/mcp/acme/notes/sse").await;

    let mut events = response
        .bytes_stream()
        .eventsource()
        .filter_map(|event| async move { event.ok() })
        .boxed();

    let endpoint = next_message(&mut events).await;
    let foreign = endpoint.data.replace("/acme/", "/globex/");

    let response = server.client.post(&foreign, &initialize(1)).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn idle_streams_carry_heartbeats() {
    let config = format!("{SCRIPTED}\n[gateway.sse]\nlegacy_heartbeat = \"50ms\"\n");
    let (server, _) = TestServer::scripted(&config).await;

    let mut response = server.client.get("/mcp/acme/notes/sse").await;
    assert_eq!(response.status(), 200);

    let raw = read_until(&mut response, "heartbeat").await;

    assert!(raw.lines().filter(|line| line.contains("heartbeat")).all(|line| line.starts_with(':')));

    // The endpoint announcement is the only data frame.
    let data: Vec<_> = raw.lines().filter(|line| line.starts_with("data:")).collect();
    assert_eq!(data.len(), 1, "{raw:?}");
    assert!(data[0].contains("/mcp/acme/notes/messages?sessionId="));
}

#[tokio::test]
async fn inactive_tenants_cannot_connect() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let response = server.client.get("/mcp/initech/notes/sse").await;
    assert_eq!(response.status(), 404);
}
