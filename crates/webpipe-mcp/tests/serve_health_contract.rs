use std::time::Duration;

/// Boots the real `webpipe serve` binary against an ephemeral port and
/// confirms `/health` reports the shape the MCP Transport promises before
/// any session has been opened.
#[tokio::test]
async fn health_endpoint_reports_no_active_session_before_any_client_connects() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let bin = assert_cmd::cargo::cargo_bin!("webpipe");
    let mut child = std::process::Command::new(bin)
        .args(["serve", "--host", "127.0.0.1", "--port", &port.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("spawn webpipe serve");

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/health");

    let mut last_err = None;
    let mut body = None;
    for _ in 0..50 {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                body = Some(resp.json::<serde_json::Value>().await.expect("health json"));
                break;
            }
            Ok(resp) => last_err = Some(format!("status {}", resp.status())),
            Err(e) => last_err = Some(e.to_string()),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let _ = child.kill();
    let _ = child.wait();

    let v = body.unwrap_or_else(|| panic!("server never became healthy: {last_err:?}"));
    assert_eq!(v["ok"].as_bool(), Some(true));
    assert!(v["activeSessionId"].is_null());
    assert_eq!(v["hasActiveTransport"].as_bool(), Some(false));
}
