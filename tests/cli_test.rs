//! CLI Integration Tests
//!
//! Run the built `twarc2` binary, against a mock API where a network is
//! needed.

#![allow(deprecated)] // Allow deprecated cargo_bin for now

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A command with no ambient credentials.
fn twarc2(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("twarc2").unwrap();
    cmd.env_remove("BEARER_TOKEN")
        .env_remove("TWARC_API_URL")
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path());
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    twarc2(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("sample"))
        .stdout(predicate::str::contains("stream-rules"))
        .stdout(predicate::str::contains("hydrate"));
}

#[test]
fn test_missing_token_fails_with_guidance() {
    let home = TempDir::new().unwrap();
    twarc2(&home)
        .arg("sample")
        .assert()
        .failure()
        .stderr(predicate::str::contains("bearer token is required"));
}

#[test]
fn test_config_file_token_is_used() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join("twarc");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config"), "bearer_token = 'from-file'\n").unwrap();

    // unreachable API, so the command gets past credentials and then fails
    twarc2(&home)
        .args(["--api-url", "http://127.0.0.1:9/2", "--connection-errors", "1"])
        .args(["stream-rules", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bearer token is required").not());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stream_rules_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/search/stream/rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "1", "value": "cats", "tag": "pets"},
                {"id": "2", "value": "dogs"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let api_url = format!("{}/2", server.uri());
    let assert = tokio::task::spawn_blocking(move || {
        twarc2(&home)
            .args(["--bearer-token", "test-token", "--api-url", &api_url])
            .args(["stream-rules", "list"])
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("cats (tag: pets)"))
        .stdout(predicate::str::contains("dogs\n"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hydrate_writes_json_lines() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "1"}, {"id": "2"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new().unwrap();
    let infile = home.path().join("ids.txt");
    let outfile = home.path().join("tweets.jsonl");
    std::fs::write(&infile, "1\n2\n").unwrap();

    let api_url = format!("{}/2", server.uri());
    let (input, output) = (infile.clone(), outfile.clone());
    let _home = tokio::task::spawn_blocking(move || {
        twarc2(&home)
            .args(["--bearer-token", "test-token", "--api-url", &api_url, "hydrate"])
            .arg(&input)
            .arg(&output)
            .assert()
            .success();
        home
    })
    .await
    .unwrap();

    let written = std::fs::read_to_string(&outfile).unwrap();
    assert_eq!(written.lines().count(), 1);
    assert!(written.contains("\"id\":\"2\""));
}
