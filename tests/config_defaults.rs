use std::time::Duration;
use tempfile::TempDir;

use volley::bot::telemetry::NodeHash;
use volley::config::{Config, DEFAULT_INFO_REPLY};

#[tokio::test]
async fn default_file_round_trips() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("config.toml");
    let path = path.to_str().expect("utf-8 path");

    Config::create_default(path).await.expect("write default");
    let config = Config::load(path).await.expect("load default");

    assert_eq!(config.bot.channel, 1);
    assert_eq!(config.bot.info_reply, DEFAULT_INFO_REPLY);
    assert_eq!(config.bot.preferred_relay, None);
    assert_eq!(config.mesh.tcp, "127.0.0.1:5000");
    assert_eq!(config.mesh.reply_timeout(), Duration::from_secs(10));
    assert_eq!(config.mesh.reconnect_max_backoff(), Duration::from_secs(30));
    assert_eq!(config.geo.db_path, "data/geo");
    assert_eq!(config.logging.level, "info");
    assert!(config.validate().is_ok());
}

#[tokio::test]
async fn file_values_override_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("volley.toml");
    std::fs::write(
        &path,
        r#"
[bot]
channel = 4
preferred_relay = "c3d4"
trigger_words = ["ping", "Echo "]

[mesh]
tcp = "bridge.lan:6000"

[rate_limit]
max_requests = 5
window_seconds = 60

[logging]
level = "debug"
file = "volley.log"
"#,
    )
    .expect("write config");

    let config = Config::load(path.to_str().expect("utf-8 path"))
        .await
        .expect("load");
    assert_eq!(config.bot.channel, 4);
    assert_eq!(config.bot.trigger_words, vec!["ping", "Echo "]);
    assert_eq!(config.bot.info_words.len(), 3);
    assert_eq!(config.preferred_relay_hash(), Some(NodeHash(0xc3)));
    assert_eq!(config.mesh.tcp, "bridge.lan:6000");
    assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
    assert_eq!(config.watchdog.poll_interval_secs, 5);
    assert_eq!(config.logging.file.as_deref(), Some("volley.log"));
    assert!(config.validate().is_ok());
}

#[tokio::test]
async fn missing_or_broken_files_are_errors() {
    let dir = TempDir::new().expect("tempdir");
    let missing = dir.path().join("nope.toml");
    let err = Config::load(missing.to_str().expect("utf-8 path"))
        .await
        .expect_err("missing file");
    assert!(err.to_string().contains("Failed to read config file"));

    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "[bot\nchannel = ").expect("write");
    let err = Config::load(broken.to_str().expect("utf-8 path"))
        .await
        .expect_err("broken file");
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn command_line_overrides_are_validated() {
    let mut config = Config::default();

    config.mesh.tcp = "localhost".into();
    assert!(config.validate().is_err());
    config.mesh.tcp = "localhost:5000".into();
    assert!(config.validate().is_ok());

    config.bot.preferred_relay = Some("a".into());
    assert!(config.validate().is_err());
    config.bot.preferred_relay = Some("a1".into());
    assert!(config.validate().is_ok());

    config.rate_limit.max_requests = 0;
    assert!(config.validate().is_err());
}
