use std::time::Duration;

use futures_util::future::join_all;
use integration_tests::{ScriptedFactory, TestServer, call_tool, request};
use serde_json::json;

use crate::SCRIPTED;

#[tokio::test]
async fn inactive_disabled_and_unknown_are_refused() {
    let (server, factory) = TestServer::scripted(SCRIPTED).await;

    for (tenant, connector) in [("initech", "notes"), ("hooli", "notes"), ("acme", "calendar"), ("umbrella", "notes")] {
        let mut client = server.mcp(tenant, connector);
        let response = client.initialize().await;

        assert_eq!(response["error"]["code"], json!(-32001), "{tenant}/{connector}");
        assert_eq!(
            response["error"]["message"],
            json!("Tenant or connector not found or inactive")
        );
        assert!(client.session_id().is_none());
    }

    assert_eq!(factory.constructions(), 0);
}

#[tokio::test]
async fn concurrent_initializes_share_one_construction() {
    let factory = ScriptedFactory::with_delay(Duration::from_millis(300));

    let server = TestServer::builder()
        .connector("scripted", factory.clone())
        .build(SCRIPTED)
        .await;

    let clients = (0..10).map(|_| {
        let mut client = server.mcp("acme", "notes");
        async move { client.initialize().await }
    });

    let responses = join_all(clients).await;

    assert!(responses.iter().all(|response| response["result"].is_object()));
    assert_eq!(factory.constructions(), 1);
}

#[tokio::test]
async fn tenants_get_their_own_backends() {
    let (server, factory) = TestServer::scripted(SCRIPTED).await;

    let mut acme = server.mcp("acme", "notes");
    acme.initialize().await;

    let mut globex = server.mcp("globex", "notes");
    globex.initialize().await;

    let response = acme.call(&call_tool(1, "credential", json!({}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("acme-secret"));

    let response = globex.call(&call_tool(1, "credential", json!({}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("globex-secret"));

    assert_eq!(factory.constructions(), 2);
}

#[tokio::test]
async fn user_tokens_scope_backends() {
    let (server, factory) = TestServer::scripted(SCRIPTED).await;

    let mut alice = server.mcp("acme", "notes").with_user_token("alice");
    alice.initialize().await;

    let mut alice_again = server.mcp("acme", "notes").with_user_token("alice");
    alice_again.initialize().await;

    let mut bob = server.mcp("acme", "notes").with_user_token("bob");
    bob.initialize().await;

    assert_eq!(factory.constructions(), 2);

    let response = alice.call(&call_tool(1, "whoami", json!({}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("alice"));

    let response = bob.call(&call_tool(1, "whoami", json!({}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("bob"));
}

#[tokio::test]
async fn session_requests_reuse_the_bound_backend() {
    let (server, factory) = TestServer::scripted(SCRIPTED).await;
    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    for id in 1..=5 {
        client.call(&request(id, "tools/list", json!({}))).await;
    }

    assert_eq!(factory.constructions(), 1);
}

#[tokio::test]
async fn denied_tools_return_a_tool_error() {
    let config = format!("{SCRIPTED}\n[gateway.policies.scripted]\ndeny_tools = [\"explode\"]\n");
    let (server, _) = TestServer::scripted(&config).await;

    let mut client = server.mcp("acme", "notes");
    client.initialize().await;

    let response = client.call(&call_tool(1, "explode", json!({}))).await;

    insta::assert_json_snapshot!(response, @r#"
    {
      "id": 1,
      "jsonrpc": "2.0",
      "result": {
        "content": [
          {
            "text": "Tool 'explode' is not allowed for 'scripted' connectors",
            "type": "text"
          }
        ],
        "isError": true
      }
    }
    "#);

    let response = client.call(&call_tool(2, "echo", json!({"text": "allowed"}))).await;
    assert_eq!(response["result"]["content"][0]["text"], json!("allowed"));
}
