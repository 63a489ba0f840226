//! Tests for CLI configuration loading.

use super::*;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn config_file(extension: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(extension)
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_config_defaults() {
    let config = CliConfig::default();
    assert_eq!(config.storage.account_name, "devstore");
    assert_eq!(config.manager.queue_name, "messages");
    assert!(config.manager.cleanup_orphaned_blobs);
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, LogFormat::Text);
}

#[test]
#[serial]
fn test_load_without_sources_uses_defaults() {
    let config = load_configuration(None).unwrap();
    assert_eq!(config, CliConfig::default());
}

#[test]
#[serial]
fn test_load_yaml_file() {
    let file = config_file(
        ".yaml",
        "storage:\n  root: /var/lib/ovq\nmanager:\n  queue_name: orders\n  cleanup_orphaned_blobs: false\nlogging:\n  format: json\n",
    );

    let config = load_configuration(Some(file.path())).unwrap();

    assert_eq!(config.storage.root, Some(PathBuf::from("/var/lib/ovq")));
    assert_eq!(config.manager.queue_name, "orders");
    assert!(!config.manager.cleanup_orphaned_blobs);
    assert_eq!(config.manager.container_name, "overflow-messages");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
#[serial]
fn test_load_toml_file() {
    let file = config_file(
        ".toml",
        "[manager]\nqueue_name = \"invoices\"\ndefault_visibility_timeout_seconds = 90\n",
    );

    let config = load_configuration(Some(file.path())).unwrap();

    assert_eq!(config.manager.queue_name, "invoices");
    assert_eq!(config.manager.default_visibility_timeout_seconds, Some(90));
}

#[test]
#[serial]
fn test_missing_file_is_reported() {
    let result = load_configuration(Some(Path::new("/nonexistent/overflow-queue.yaml")));
    assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = config_file(".yaml", "manager:\n  queue_name: from-file\n");
    std::env::set_var("OVQ__MANAGER__QUEUE_NAME", "from-env");
    std::env::set_var("OVQ__STORAGE__SERVER_TIMEOUT_SECONDS", "15");

    let result = load_configuration(Some(file.path()));

    std::env::remove_var("OVQ__MANAGER__QUEUE_NAME");
    std::env::remove_var("OVQ__STORAGE__SERVER_TIMEOUT_SECONDS");

    let config = result.unwrap();
    assert_eq!(config.manager.queue_name, "from-env");
    assert_eq!(
        config.storage.server_timeout(),
        Some(std::time::Duration::from_secs(15))
    );
}

#[test]
fn test_account_key_must_be_base64() {
    let mut storage = StorageConfig::default();
    assert_eq!(storage.account_key().unwrap(), None);

    storage.account_key = Some("c2VjcmV0".to_string());
    assert_eq!(storage.account_key().unwrap(), Some(b"secret".to_vec()));

    storage.account_key = Some("not base64!".to_string());
    assert!(matches!(
        storage.account_key(),
        Err(ConfigError::InvalidValue { .. })
    ));
}

#[test]
fn test_validate_checks_manager_settings() {
    let mut config = CliConfig::default();
    assert!(config.validate().is_ok());

    config.manager.queue_name = "Bad_Name".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn test_zero_server_timeout_rejected() {
    let mut config = CliConfig::default();
    config.storage.server_timeout_seconds = Some(0);
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { .. })
    ));
}

#[test]
fn test_redacted_hides_key() {
    let mut config = CliConfig::default();
    config.storage.account_key = Some("c2VjcmV0".to_string());

    let redacted = config.redacted();

    assert_eq!(redacted.storage.account_key.as_deref(), Some("<redacted>"));
    assert_eq!(redacted.manager, config.manager);
}

#[test]
fn test_explicit_root_wins() {
    let storage = StorageConfig {
        root: Some(PathBuf::from("/data")),
        ..StorageConfig::default()
    };
    assert_eq!(storage.root_dir().unwrap(), PathBuf::from("/data"));
}
