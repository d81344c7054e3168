use std::time::Duration;

use serialkeeper::config::Config;
use serialkeeper::link::LinkSettings;
use serialkeeper::params::{Parity, StopBits};

#[tokio::test]
async fn default_file_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("serialkeeper.toml");
    let path = path.to_str().expect("utf-8 path");

    Config::create_default(path).await.expect("write default");
    let config = Config::load(path).await.expect("load default");

    assert_eq!(config.settings(), LinkSettings::default());
    assert_eq!(config.logging.file.as_deref(), Some("serialkeeper.log"));
    let params = config.link.to_params().expect("default params valid");
    assert_eq!(params.baud_rate, 115200);
    assert_eq!(params.parity, Parity::None);
    assert_eq!(params.stop_bits, StopBits::One);
}

#[tokio::test]
async fn custom_values_reach_the_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("custom.toml");
    std::fs::write(
        &path,
        r#"
[link]
port = "/dev/ttyACM0"
baud_rate = 9600
parity = "O"
stop_bits = 1.5
read_timeout_ms = 250

[reader]
max_consecutive_errors = 8
removal_pause_ms = 20

[monitor]
health_interval_ms = 500

[send]
max_payload_bytes = 1024
"#,
    )
    .expect("write config");

    let config = Config::load(path.to_str().expect("utf-8 path"))
        .await
        .expect("load");
    let params = config.link.to_params().expect("valid");
    assert_eq!(params.port, "/dev/ttyACM0");
    assert_eq!(params.parity, Parity::Odd);
    assert_eq!(params.stop_bits, StopBits::OnePointFive);
    assert_eq!(params.read_timeout, Duration::from_millis(250));

    let settings = config.settings();
    assert_eq!(settings.reader.max_consecutive_errors, 8);
    assert_eq!(settings.reader.removal_pause, Duration::from_millis(20));
    assert_eq!(settings.health_interval, Duration::from_millis(500));
    assert_eq!(settings.max_payload, 1024);
    assert_eq!(settings.write_chunk, 1024);
}

#[tokio::test]
async fn missing_or_broken_files_are_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.toml");
    assert!(Config::load(missing.to_str().unwrap()).await.is_err());

    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "[link\nport = ").expect("write");
    let err = Config::load(broken.to_str().unwrap()).await.unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
}

#[tokio::test]
async fn only_a_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("absent.toml");
    let loaded = Config::load_if_present(missing.to_str().unwrap())
        .await
        .expect("missing file is not an error");
    assert!(loaded.is_none());

    let typo = dir.path().join("typo.toml");
    std::fs::write(&typo, "[link]\nport = \"/dev/ttyACM3\"\nbaud_rate = \"fast\"\n").expect("write");
    let err = Config::load_if_present(typo.to_str().unwrap())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));

    let good = dir.path().join("good.toml");
    std::fs::write(&good, "[link]\nport = \"/dev/ttyACM3\"\n").expect("write");
    let config = Config::load_if_present(good.to_str().unwrap())
        .await
        .expect("load")
        .expect("present");
    assert_eq!(config.link.port, "/dev/ttyACM3");
}
