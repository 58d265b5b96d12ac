//! Tests for delivery configuration loading, precedence, and defaults.

use std::io::Write;
use std::time::Duration;

use chat_delivery::config::ChatConfig;

#[test]
fn defaults_match_documented_timeouts() {
    let config = ChatConfig::default();
    assert_eq!(config.send_timeout(), Duration::from_millis(3000));
    assert_eq!(config.between_chunk_timeout(), Duration::from_millis(30_000));
    assert_eq!(config.request_timeout(), Duration::from_millis(10_000));
    assert_eq!(config.channel.endpoint, "http://localhost:8080/api/chat");
}

#[test]
fn parse_complete_config() {
    let toml_content = r#"
[send]
send_timeout_ms = 5000
between_chunk_timeout_ms = 60_000

[channel]
endpoint = "https://chat.example.com/api/chat"
request_timeout_ms = 2500
"#;

    let config = ChatConfig::from_toml(toml_content).expect("parse config");

    assert_eq!(config.send.send_timeout_ms, 5000);
    assert_eq!(config.send.between_chunk_timeout_ms, 60_000);
    assert_eq!(config.channel.endpoint, "https://chat.example.com/api/chat");
    assert_eq!(config.channel.request_timeout_ms, 2500);
}

#[test]
fn partial_config_keeps_defaults_for_the_rest() {
    let config = ChatConfig::from_toml("[send]\nsend_timeout_ms = 1500\n").expect("parse config");

    assert_eq!(config.send.send_timeout_ms, 1500);
    assert_eq!(config.send.between_chunk_timeout_ms, 30_000);
    assert_eq!(config.channel.request_timeout_ms, 10_000);
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(ChatConfig::from_toml("[send\nsend_timeout_ms = ").is_err());
}

#[test]
fn load_from_reads_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("config.toml");
    let mut f = std::fs::File::create(&config_path).expect("create file");
    f.write_all(b"[channel]\nendpoint = \"http://10.0.0.1/chat\"\n")
        .expect("write");

    let config = ChatConfig::load_from(&config_path).expect("load config");
    assert_eq!(config.channel.endpoint, "http://10.0.0.1/chat");
    assert_eq!(config.send.send_timeout_ms, 3000);
}

#[test]
fn load_from_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ChatConfig::load_from(&dir.path().join("absent.toml")).expect("load config");
    assert_eq!(config.send.send_timeout_ms, 3000);
}

#[test]
fn env_overrides_beat_file_values() {
    let mut config =
        ChatConfig::from_toml("[send]\nsend_timeout_ms = 5000\n").expect("parse config");

    config.apply_overrides(|key| match key {
        "CHAT_SEND_TIMEOUT_MS" => Some("750".to_owned()),
        "CHAT_CHANNEL_ENDPOINT" => Some("http://override/chat".to_owned()),
        _ => None,
    });

    assert_eq!(config.send.send_timeout_ms, 750);
    assert_eq!(config.channel.endpoint, "http://override/chat");
    // Untouched keys keep their file/default values.
    assert_eq!(config.send.between_chunk_timeout_ms, 30_000);
}

#[test]
fn invalid_env_override_is_ignored() {
    let mut config = ChatConfig::default();

    config.apply_overrides(|key| match key {
        "CHAT_SEND_TIMEOUT_MS" => Some("not-a-number".to_owned()),
        "CHAT_CHANNEL_REQUEST_TIMEOUT_MS" => Some("".to_owned()),
        _ => None,
    });

    assert_eq!(config.send.send_timeout_ms, 3000);
    assert_eq!(config.channel.request_timeout_ms, 10_000);
}
