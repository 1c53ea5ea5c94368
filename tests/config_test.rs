//! Tests for client configuration loading.

use std::io::Write;
use std::time::Duration;

use strictly_chess::{Backoff, ClientConfig};
use tempfile::NamedTempFile;

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[test]
fn test_defaults() {
    let config = ClientConfig::default();

    assert_eq!(
        config.ws_base_url().expect("valid url").as_str(),
        "ws://localhost:8080/"
    );
    assert_eq!(
        config.api_base_url().expect("valid url").as_str(),
        "http://localhost:8080/"
    );
    assert!(config.user_id().is_none());
    assert_eq!(config.backoff_policy(), Backoff::default());
}

#[test]
fn test_load_from_file() {
    let file = config_file(
        r#"
ws_base = "wss://chess.example.com/api"
api_base = "https://chess.example.com/api"
user_id = "u1"

[backoff]
base_ms = 500
max_ms = 8000
"#,
    );

    let config = ClientConfig::from_file(file.path()).expect("valid config");

    assert_eq!(config.ws_base(), "wss://chess.example.com/api");
    assert_eq!(config.user_id().as_deref(), Some("u1"));
    assert_eq!(*config.backoff().base_ms(), 500);
    let backoff = config.backoff_policy();
    assert_eq!(*backoff.base(), Duration::from_millis(500));
    assert_eq!(backoff.delay(10), Duration::from_millis(8000));
}

#[test]
fn test_partial_file_uses_defaults() {
    let file = config_file("user_id = \"u2\"\n");

    let config = ClientConfig::from_file(file.path()).expect("valid config");

    assert_eq!(config.ws_base(), "ws://localhost:8080");
    assert_eq!(*config.backoff().max_ms(), 30_000);
    assert_eq!(config.clone().with_user_id("u3").user_id().as_deref(), Some("u3"));
}

#[test]
fn test_rejects_wrong_schemes() {
    let ws = config_file("ws_base = \"http://localhost:8080\"\n");
    let error = ClientConfig::from_file(ws.path()).expect_err("http is not a socket scheme");
    assert!(error.message.contains("ws_base"));

    let api = config_file("api_base = \"ftp://localhost\"\n");
    let error = ClientConfig::from_file(api.path()).expect_err("ftp is not an api scheme");
    assert!(error.message.contains("api_base"));
}

#[test]
fn test_rejects_inverted_backoff() {
    let file = config_file("[backoff]\nbase_ms = 5000\nmax_ms = 1000\n");
    let error = ClientConfig::from_file(file.path()).expect_err("base above max");
    assert!(error.message.contains("backoff"));

    let zero = config_file("[backoff]\nbase_ms = 0\n");
    assert!(ClientConfig::from_file(zero.path()).is_err());
}

#[test]
fn test_missing_and_malformed_files() {
    let error = ClientConfig::from_file("/nonexistent/strictly_chess.toml")
        .expect_err("file does not exist");
    assert!(error.message.contains("read"));

    let file = config_file("ws_base = [not toml");
    let error = ClientConfig::from_file(file.path()).expect_err("not toml");
    assert!(error.message.contains("parse"));
}
