use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn webpipe_version_contract() {
    let assert = Command::cargo_bin("webpipe").unwrap().arg("version").assert().success();
    let s = String::from_utf8_lossy(&assert.get_output().stdout).into_owned();
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse version json");

    assert_eq!(v["schema_version"].as_u64(), Some(1));
    assert_eq!(v["name"].as_str(), Some("webpipe"));
    assert!(!v["version"].as_str().unwrap_or("").is_empty());
}

#[test]
fn webpipe_version_text_output_starts_with_binary_name() {
    Command::cargo_bin("webpipe")
        .unwrap()
        .args(["version", "--output", "text"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("webpipe "));
}

#[test]
fn webpipe_rejects_unknown_subcommand() {
    Command::cargo_bin("webpipe").unwrap().arg("not-a-real-subcommand").assert().failure();
}
