use std::env;
use std::path::PathBuf;
use std::sync::Mutex;

use bridge_app::BridgeConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn toml_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("BRIDGE_CONFIG", fixture_path("config-valid.toml"));

    let config = BridgeConfig::load().expect("load config");
    config.validate().expect("validate config");
    let groups = config.groups().expect("group sites");
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].sites.len(), 2);

    env::remove_var("BRIDGE_CONFIG");
}

#[test]
fn json_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("BRIDGE_CONFIG", fixture_path("config-valid.json"));

    let config = BridgeConfig::load().expect("load config");
    config.validate().expect("validate config");

    env::remove_var("BRIDGE_CONFIG");
}

#[test]
fn invalid_config_fails_validation() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("BRIDGE_CONFIG", fixture_path("config-invalid.toml"));

    let config = BridgeConfig::load().expect("load config");
    assert!(config.validate().is_err());

    env::remove_var("BRIDGE_CONFIG");
}

#[test]
fn env_override_wins_over_file() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("BRIDGE_CONFIG", fixture_path("config-valid.toml"));
    env::set_var("BRIDGE_RDS_HOST", "http://override.example.internal");

    let config = BridgeConfig::load().expect("load config");
    assert_eq!(config.rds_base_url, "http://override.example.internal");

    env::remove_var("BRIDGE_CONFIG");
    env::remove_var("BRIDGE_RDS_HOST");
}

fn fixture_path(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path.to_string_lossy().to_string()
}
