use integration_tests::{TestServer, call_tool, initialize, request};
use serde_json::json;

use crate::SCRIPTED;

#[tokio::test]
async fn initialize_and_call_tools() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut ws = server.websocket("acme", "notes").await;

    let (response, _) = ws.call(&initialize(1)).await;
    assert_eq!(response["result"]["protocolVersion"], json!("2025-06-18"));
    assert_eq!(response["result"]["serverInfo"]["name"], json!("relay (acme/notes)"));

    let (response, _) = ws.call(&call_tool(2, "echo", json!({"text": "over websocket"}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("over websocket"));

    ws.close().await;
}

#[tokio::test]
async fn requests_before_initialize_are_refused() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut ws = server.websocket("acme", "notes").await;

    let (response, _) = ws.call(&request(1, "tools/list", json!({}))).await;

    insta::assert_json_snapshot!(response, @r#"
    {
      "error": {
        "code": -32001,
        "message": "Session not initialized"
      },
      "id": 1,
      "jsonrpc": "2.0"
    }
    "#);
}

#[tokio::test]
async fn unknown_tenant_is_refused() {
    let (server, factory) = TestServer::scripted(SCRIPTED).await;
    let mut ws = server.websocket("umbrella", "notes").await;

    let (response, _) = ws.call(&initialize(1)).await;

    insta::assert_json_snapshot!(response, @r#"
    {
      "error": {
        "code": -32001,
        "message": "Tenant or connector not found or inactive"
      },
      "id": 1,
      "jsonrpc": "2.0"
    }
    "#);

    assert_eq!(factory.constructions(), 0);
}

#[tokio::test]
async fn parse_errors_keep_the_connection_open() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut ws = server.websocket("acme", "notes").await;

    ws.send_text("this is not json").await;

    let response = ws.recv().await;
    assert_eq!(response["id"], json!(null));
    assert_eq!(response["error"]["code"], json!(-32700));

    let (response, _) = ws.call(&initialize(1)).await;
    assert!(response["result"].is_object());
}

#[tokio::test]
async fn set_user_token_applies_to_later_calls() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut ws = server.websocket("acme", "notes").await;

    ws.call(&initialize(1)).await;

    let (response, _) = ws.call(&call_tool(2, "whoami", json!({}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("anonymous"));

    let (response, _) = ws
        .call(&request(3, "auth/setUserToken", json!({"token": "user-123"})))
        .await;

    assert_eq!(response["result"], json!({}));

    let (response, _) = ws.call(&call_tool(4, "whoami", json!({}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("user-123"));
}

#[tokio::test]
async fn set_user_token_requires_a_token() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut ws = server.websocket("acme", "notes").await;

    ws.call(&initialize(1)).await;

    let (response, _) = ws.call(&request(2, "auth/setUserToken", json!({}))).await;
    assert_eq!(response["error"]["code"], json!(-32602));
}

#[tokio::test]
async fn slow_calls_do_not_block_the_connection() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut ws = server.websocket("acme", "notes").await;

    ws.call(&initialize(1)).await;

    ws.send(&call_tool(2, "sleep", json!({"millis": 500}))).await;
    ws.send(&call_tool(3, "echo", json!({"text": "quick"}))).await;

    let first = ws.recv().await;
    let second = ws.recv().await;

    assert_eq!(first["id"], json!(3));
    assert_eq!(second["id"], json!(2));
}

#[tokio::test]
async fn tool_notifications_reach_the_connection() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut ws = server.websocket("acme", "notes").await;

    ws.call(&initialize(1)).await;
    ws.send(&call_tool(2, "progress", json!({}))).await;

    let (mut responses, mut notifications) = (Vec::new(), Vec::new());

    for _ in 0..2 {
        let message = ws.recv().await;

        if message.get("method").is_some() {
            notifications.push(message);
        } else {
            responses.push(message);
        }
    }

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["result"]["content"][0]["text"], json!("progress sent"));

    insta::assert_json_snapshot!(notifications, @r#"
    [
      {
        "jsonrpc": "2.0",
        "method": "notifications/progress",
        "params": {
          "progress": 1,
          "progressToken": "p1"
        }
      }
    ]
    "#);
}

#[tokio::test]
async fn notifications_stay_on_their_connection() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let mut first = server.websocket("acme", "notes").await;
    first.call(&initialize(1)).await;

    let mut second = server.websocket("acme", "notes").await;
    second.call(&initialize(1)).await;

    first.call(&call_tool(2, "progress", json!({}))).await;
    first.call(&call_tool(3, "announce", json!({}))).await;

    let received = second.recv().await;
    assert_eq!(received["method"], json!("notifications/message"));
}
