use super::*;
use std::path::PathBuf;

fn described() -> Config {
    let mut config = Config::default();
    config.service.description = Some("test service".to_string());
    config
}

#[test]
fn test_validate_default_config() {
    let config = Config::default();
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "service.description"));
}

#[test]
fn test_validate_described_config_has_no_warnings() {
    let result = ConfigValidator::validate(&described()).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.is_empty());
}

#[test]
fn test_validate_empty_service_name() {
    let mut config = described();
    config.service.name = "  ".to_string();

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "service.name"));
}

#[test]
fn test_validate_service_name_with_at_sign() {
    let mut config = described();
    config.service.name = "worker@blue".to_string();

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "service.name"));
}

#[test]
fn test_validate_instance_with_whitespace() {
    let mut config = described();
    config.service.instance = Some("blue green".to_string());

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "service.instance"));
}

#[test]
fn test_validate_zero_timeouts() {
    let mut config = described();
    config.host.listen_timeout_secs = 0;
    config.host.control_timeout_secs = 0;
    config.install.command_timeout_secs = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    assert_eq!(result.errors.len(), 3);
}

#[test]
fn test_validate_relative_init_dir() {
    let mut config = described();
    config.install.init_dir = PathBuf::from("init.d");

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "install.init_dir"));
}

#[test]
fn test_validate_unknown_log_level_warning() {
    let mut config = described();
    config.logging.level = "verbose".to_string();

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "logging.level"));
}

#[test]
fn test_into_result_reports_first_error() {
    let mut config = described();
    config.service.name = String::new();

    let err = ConfigValidator::validate(&config)
        .unwrap()
        .into_result()
        .unwrap_err();
    assert!(err.to_string().contains("service.name"));
}

#[test]
fn test_check_identifier() {
    assert!(ConfigValidator::check_identifier("heartbeat").is_none());
    assert!(ConfigValidator::check_identifier("a/b").is_some());
    assert!(ConfigValidator::check_identifier("").is_some());
}
