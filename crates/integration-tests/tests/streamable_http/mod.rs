use integration_tests::{TestServer, call_tool, request};
use serde_json::json;

use crate::SCRIPTED;

#[tokio::test]
async fn initialize_creates_a_session() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");

    let response = client.initialize().await;

    insta::assert_json_snapshot!(response, {
        ".result.serverInfo.version" => "[version]"
    }, @r#"
    {
      "id": 0,
      "jsonrpc": "2.0",
      "result": {
        "capabilities": {
          "resources": {
            "listChanged": true,
            "subscribe": true
          },
          "tools": {
            "listChanged": true
          }
        },
        "protocolVersion": "2025-06-18",
        "serverInfo": {
          "name": "relay (acme/notes)",
          "version": "[version]"
        }
      }
    }
    "#);

    let session_id = client.session_id().unwrap();
    assert_eq!(session_id.len(), 32);
}

#[tokio::test]
async fn older_clients_get_an_older_version() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");

    let response = client
        .call(&request(1, "initialize", json!({"protocolVersion": "2025-03-26"})))
        .await;

    assert_eq!(response["result"]["protocolVersion"], json!("2024-11-05"));
}

#[tokio::test]
async fn unsupported_version_is_rejected() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");

    let response = client
        .call(&request(1, "initialize", json!({"protocolVersion": "2023-01-01"})))
        .await;

    insta::assert_json_snapshot!(response, @r#"
    {
      "error": {
        "code": -32602,
        "data": {
          "requested": "2023-01-01",
          "supported": [
            "2025-06-18",
            "2024-11-05"
          ]
        },
        "message": "Unsupported protocol version: 2023-01-01"
      },
      "id": 1,
      "jsonrpc": "2.0"
    }
    "#);

    assert!(client.session_id().is_none());
}

#[tokio::test]
async fn tools_resources_and_calls() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    let tools = client.call(&request(1, "tools/list", json!({}))).await;
    let names: Vec<_> = tools["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap())
        .collect();

    insta::assert_json_snapshot!(names, @r#"
    [
      "echo",
      "whoami",
      "credential",
      "progress",
      "announce",
      "sleep",
      "explode"
    ]
    "#);

    let echo = client.call(&call_tool(2, "echo", json!({"text": "hello"}))).await;

    insta::assert_json_snapshot!(echo, @r#"
    {
      "id": 2,
      "jsonrpc": "2.0",
      "result": {
        "content": [
          {
            "text": "hello",
            "type": "text"
          }
        ],
        "isError": false
      }
    }
    "#);

    let credential = client.call(&call_tool(3, "credential", json!({}))).await;
    assert_eq!(credential["result"]["content"][0]["text"], json!("acme-secret"));

    let resources = client.call(&request(4, "resources/list", json!({}))).await;
    assert_eq!(resources["result"]["resources"][0]["uri"], json!("notes://welcome"));

    let read = client
        .call(&request(5, "resources/read", json!({"uri": "notes://welcome"})))
        .await;

    assert_eq!(read["result"]["contents"][0]["text"], json!("welcome, acme"));
}

#[tokio::test]
async fn connector_failure_is_an_internal_error() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    let response = client.call(&call_tool(9, "explode", json!({}))).await;

    insta::assert_json_snapshot!(response, @r#"
    {
      "error": {
        "code": -32603,
        "message": "Internal error: the scripted service exploded"
      },
      "id": 9,
      "jsonrpc": "2.0"
    }
    "#);

    // The backend keeps serving after a failed call.
    let response = client.call(&call_tool(10, "echo", json!({"text": "still here"}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("still here"));
}

#[tokio::test]
async fn requests_without_session_are_refused() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");

    let response = client.call(&request(1, "tools/list", json!({}))).await;

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
async fn unknown_method_is_reported() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    let response = client.call(&request(1, "prompts/list", json!({}))).await;

    insta::assert_json_snapshot!(response, @r#"
    {
      "error": {
        "code": -32601,
        "message": "Method not found: prompts/list"
      },
      "id": 1,
      "jsonrpc": "2.0"
    }
    "#);
}

#[tokio::test]
async fn ping_works_without_initialize() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");

    let response = client.call(&request(1, "ping", json!({}))).await;
    assert_eq!(response["result"], json!({}));
}

#[tokio::test]
async fn malformed_body_is_a_parse_error() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let response = server
        .client
        .request(reqwest::Method::POST, "/mcp/acme/notes")
        .header("content-type", "application/json")
        .body("{\"jsonrpc\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], json!(null));
    assert_eq!(body["error"]["code"], json!(-32700));
}

#[tokio::test]
async fn notifications_are_accepted() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    let response = client
        .send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;

    assert_eq!(response.status(), 202);
}

#[tokio::test]
async fn batches_answer_requests_in_order() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    let batch = json!([
        call_tool(1, "sleep", json!({"millis": 200})),
        {"jsonrpc": "2.0", "method": "notifications/initialized"},
        call_tool(2, "echo", json!({"text": "fast"})),
        request(3, "nope", json!({})),
    ]);

    let response = client.call(&batch).await;
    let ids: Vec<_> = response.as_array().unwrap().iter().map(|r| r["id"].clone()).collect();

    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    assert_eq!(response[0]["result"]["content"][0]["text"], json!("slept 200ms"));
    assert_eq!(response[1]["result"]["content"][0]["text"], json!("fast"));
    assert_eq!(response[2]["error"]["code"], json!(-32601));
}

#[tokio::test]
async fn delete_terminates_the_session() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    let response = client.delete().await;
    assert_eq!(response.status(), 204);

    let response = client.send(&request(1, "tools/list", json!({}))).await;
    assert_eq!(response.status(), 400);

    let body: serde_json::Value = response.json().await.unwrap();

    insta::assert_json_snapshot!(body, @r#"
    {
      "error": "Invalid or expired session ID"
    }
    "#);
}

#[tokio::test]
async fn delete_without_session_header_is_a_bad_request() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let response = server.mcp("acme", "notes").delete().await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn sessions_do_not_cross_tenants() {
    let (server, _) = TestServer::scripted(SCRIPTED).await;

    let mut acme = server.mcp("acme", "notes");
    acme.initialize().await;

    let session_id = acme.session_id().unwrap().to_string();

    let response = server
        .client
        .request(reqwest::Method::POST, "/mcp/globex/notes")
        .header("mcp-session-id", session_id)
        .json(&request(1, "tools/list", json!({})))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn stateless_mode_needs_no_initialize() {
    let config = format!("{SCRIPTED}\n[gateway.sessions]\nenabled = false\n");
    let (server, _) = TestServer::scripted(&config).await;
    let mut client = server.mcp("acme", "notes");

    let response = client.call(&call_tool(1, "echo", json!({"text": "stateless"}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("stateless"));

    client.initialize().await;
    assert!(client.session_id().is_none());
}
