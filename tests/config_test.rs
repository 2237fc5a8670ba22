use clap::Parser;
use std::time::Duration;

use readiness_audit::config::*;

#[test]
fn test_defaults() {
    assert_eq!(DEFAULT_AUDIT_PORT, 9890);
    assert_eq!(PROBE_TIMEOUT_SECS, 5);
    assert_eq!(TEST_HISTORY_CAPACITY, 10);
    assert_eq!(FULLY_OPERATIONAL_MIN_SCORE, 80.0);
    assert_eq!(PARTIALLY_OPERATIONAL_MIN_SCORE, 40.0);
}

#[test]
fn test_config_from_default_args() {
    let args = CliArgs::parse_from(["readiness-audit", "--base-url", "http://localhost:5000/"]);
    let config = AuditConfig::from_args(args).unwrap();

    assert_eq!(config.base_url, "http://localhost:5000");
    assert_eq!(config.port, DEFAULT_AUDIT_PORT);
    assert_eq!(config.max_concurrent_probes, DEFAULT_MAX_CONCURRENT_PROBES);
    assert_eq!(config.probe_timeout, Duration::from_secs(PROBE_TIMEOUT_SECS));
    assert_eq!(config.unreachable, UnreachablePolicy::OptimisticPass);
    assert!(config.registry_file.is_none());
    assert!(!config.audit_once);
}

#[test]
fn test_config_from_explicit_args() {
    let args = CliArgs::parse_from([
        "readiness-audit",
        "--base-url",
        "https://platform.example.com",
        "--data-dir",
        "/tmp/audit",
        "--registry",
        "/tmp/registry.json",
        "--port",
        "9999",
        "--max-concurrent-probes",
        "0",
        "--probe-timeout-secs",
        "2",
        "--unreachable",
        "fail",
        "--audit-once",
    ]);
    let config = AuditConfig::from_args(args).unwrap();

    assert_eq!(config.base_url, "https://platform.example.com");
    assert_eq!(config.data_dir, std::path::PathBuf::from("/tmp/audit"));
    assert_eq!(
        config.registry_file.as_deref(),
        Some(std::path::Path::new("/tmp/registry.json"))
    );
    assert_eq!(config.port, 9999);
    // Concurrency is clamped to at least one probe.
    assert_eq!(config.max_concurrent_probes, 1);
    assert_eq!(config.probe_timeout, Duration::from_secs(2));
    assert_eq!(config.unreachable, UnreachablePolicy::Fail);
    assert!(config.audit_once);
}

#[test]
fn test_invalid_base_url_is_rejected() {
    let args = CliArgs::parse_from(["readiness-audit", "--base-url", "not a url"]);
    assert!(AuditConfig::from_args(args).is_err());

    let args = CliArgs::parse_from(["readiness-audit", "--base-url", "ftp://platform"]);
    assert!(AuditConfig::from_args(args).is_err());
}
