use integration_tests::{TestServer, TestService, call_tool, request};
use serde_json::json;

fn config(address: std::net::SocketAddr, credential: &str) -> String {
    format!(
        r#"
        [tenants.acme.connectors.calculator]
        url = "http://{address}/mcp"
        credential = "{credential}"
        "#
    )
}

#[tokio::test]
async fn proxies_a_streamable_http_server() {
    let address = TestService::with_required_token("s3cret").spawn().await;
    let server = TestServer::builder().build(&config(address, "s3cret")).await;

    let mut client = server.mcp("acme", "calculator");
    client.initialize().await;

    let tools = client.call(&request(1, "tools/list", json!({}))).await;

    let tools = tools["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], json!("adder"));
    assert_eq!(tools[0]["inputSchema"]["required"], json!(["a", "b"]));

    let sum = client.call(&call_tool(2, "adder", json!({"a": 2, "b": 40}))).await;
    assert_eq!(sum["result"]["content"][0]["text"], json!("2 + 40 = 42"));

    let changelog = client
        .call(&request(3, "resources/read", json!({"uri": "docs://changelog"})))
        .await;

    assert_eq!(changelog["result"]["contents"][0]["text"], json!("v1: first release"));
}

#[tokio::test]
async fn wrong_credential_fails_initialize() {
    let address = TestService::with_required_token("s3cret").spawn().await;
    let server = TestServer::builder().build(&config(address, "wrong")).await;

    let mut client = server.mcp("acme", "calculator");
    let response = client.initialize().await;

    assert_eq!(response["error"]["code"], json!(-32603));
    assert!(client.session_id().is_none());
}

#[tokio::test]
async fn unreachable_downstream_only_fails_its_connector() {
    let address = TestService::default().spawn().await;

    let config = format!(
        r#"
        [tenants.acme.connectors.calculator]
        url = "http://127.0.0.1:1/mcp"

        [tenants.acme.connectors.working]
        url = "http://{address}/mcp"
        "#
    );

    let server = TestServer::builder().build(&config).await;

    let response = server.mcp("acme", "calculator").initialize().await;
    assert_eq!(response["error"]["code"], json!(-32603));

    let response = server.mcp("acme", "working").initialize().await;
    assert!(response["result"].is_object());
}
