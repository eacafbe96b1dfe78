#[test]
fn webpipe_doctor_contract_json() {
    let bin = assert_cmd::cargo::cargo_bin!("webpipe");
    let out = std::process::Command::new(bin)
        .args(["doctor"])
        .env_remove("WEBPIPE_NODE_PATH")
        .env_remove("WEBPIPE_NODE")
        .env_remove("WEBPIPE_RENDER_DISABLE")
        .output()
        .expect("run webpipe doctor");

    assert!(out.status.success(), "webpipe doctor failed");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse doctor json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["kind"].as_str(), Some("doctor"));
    assert_eq!(v["name"].as_str(), Some("webpipe"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
    assert!(v.get("elapsed_ms").is_some());

    let checks = v["checks"].as_array().expect("checks array");
    assert!(checks.iter().any(|c| c["name"].as_str() == Some("tool_registry")));
    assert!(checks.iter().any(|c| c["name"].as_str() == Some("driven_browser_runtime")));

    let registry_check = checks.iter().find(|c| c["name"].as_str() == Some("tool_registry")).unwrap();
    assert_eq!(registry_check["tool_count"].as_u64(), Some(17));
}

#[test]
fn webpipe_doctor_reports_render_disable_override() {
    let bin = assert_cmd::cargo::cargo_bin!("webpipe");
    let out = std::process::Command::new(bin)
        .args(["doctor"])
        .env("WEBPIPE_RENDER_DISABLE", "1")
        .output()
        .expect("run webpipe doctor");

    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse doctor json");
    let checks = v["checks"].as_array().expect("checks array");
    let browser_check = checks
        .iter()
        .find(|c| c["name"].as_str() == Some("driven_browser_runtime"))
        .expect("driven_browser_runtime check");
    assert_eq!(browser_check["render_disabled"].as_bool(), Some(true));
}

#[test]
fn webpipe_doctor_reports_configured_node_path() {
    let fake_node = tempfile::NamedTempFile::new().expect("tempfile");

    let bin = assert_cmd::cargo::cargo_bin!("webpipe");
    let out = std::process::Command::new(bin)
        .args(["doctor"])
        .env("WEBPIPE_NODE_PATH", fake_node.path())
        .env_remove("WEBPIPE_RENDER_DISABLE")
        .output()
        .expect("run webpipe doctor");

    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse doctor json");
    let checks = v["checks"].as_array().expect("checks array");
    let browser_check = checks
        .iter()
        .find(|c| c["name"].as_str() == Some("driven_browser_runtime"))
        .expect("driven_browser_runtime check");
    assert_eq!(browser_check["node_path_configured"].as_bool(), Some(true));
}
