//! Integration tests for Configuration System

use refereed::config::{ConfigLoader, RefereedConfig};
use refereed::policy::{Operation, PolicyTable};
use refereed::provider::CapabilityRegistry;
use refereed::runtime::Services;
use refereed::workflow::{ExecutionMode, ReviewerTimeoutPolicy};
use tempfile::TempDir;

fn write_config(temp_dir: &TempDir, body: &str) -> std::path::PathBuf {
    let config_file = temp_dir.path().join("refereed.toml");
    std::fs::write(&config_file, body).unwrap();
    config_file
}

#[test]
fn test_config_file_drives_pipeline_and_pool() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = write_config(
        &temp_dir,
        r#"
[pipeline]
max_rounds = 2
threshold = 7.5
team_size = 4
reviewer_timeout_policy = "fail_round"
default_mode = "multi_author"
criteria = ["accuracy", "clarity"]

[pool]
workers = 3
min_submit_interval_ms = 0

[storage]
root = "state"
"#,
    );

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.pipeline.max_rounds, 2);
    assert_eq!(config.pipeline.threshold, 7.5);
    assert_eq!(config.pipeline.team_size, 4);
    assert_eq!(
        config.pipeline.reviewer_timeout_policy,
        ReviewerTimeoutPolicy::FailRound
    );
    assert_eq!(config.pipeline.default_mode, ExecutionMode::MultiAuthor);
    assert_eq!(config.pipeline.criteria, vec!["accuracy", "clarity"]);
    assert_eq!(config.pool.workers, 3);
    assert_eq!(config.pool.min_submit_interval_ms, 0);
    // Unset keys keep their defaults
    assert!(config.pipeline.desk_screening);
    assert!(config.pool.resume_on_start);

    let (results, store) = config.storage.resolve_paths(temp_dir.path());
    assert!(results.ends_with("state/results"));
    assert!(store.ends_with("state/store"));
}

#[test]
fn test_tiers_and_policies_load() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = write_config(
        &temp_dir,
        r#"
[providers.local]
endpoint = "http://localhost:11434/v1"
model = "llama3"

[tiers]
fast = "local"
strong = "local"

[policies.review]
tier = "fast"
fallback_tier = "strong"
max_retries = 1
timeout_ms = 30000
"#,
    );

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_ok());

    let registry = CapabilityRegistry::from_config(&config).unwrap();
    assert_eq!(registry.tiers(), vec!["fast".to_string(), "strong".to_string()]);

    let policies = PolicyTable::from_overrides(&config.policies);
    let review = policies.policy(Operation::Review);
    assert_eq!(review.tier, "fast");
    assert_eq!(review.fallback_tier.as_deref(), Some("strong"));
    assert_eq!(review.max_retries, 1);
    assert_eq!(review.timeout_ms, 30_000);
}

#[test]
fn test_invalid_config_is_rejected_with_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = write_config(
        &temp_dir,
        r#"
[pipeline]
threshold = 12.0

[pool]
workers = 0

[tiers]
fast = "missing"

[policies.summarize]
max_retries = 2
"#,
    );

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 4);

    let message = config.ensure_valid().unwrap_err().to_string();
    assert!(message.contains("threshold"));
    assert!(message.contains("workers"));
    assert!(message.contains("missing"));
    assert!(message.contains("summarize"));

    let services = Services::from_config(config, temp_dir.path());
    assert!(services.is_err());
}

#[test]
fn test_missing_config_file_errors() {
    let temp_dir = TempDir::new().unwrap();
    let result = ConfigLoader::load_from_file(&temp_dir.path().join("absent.toml"));
    assert!(result.is_err());
}

#[test]
fn test_environment_overrides_file_values() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = write_config(
        &temp_dir,
        r#"
[pool]
max_queue_size = 10
"#,
    );

    std::env::set_var("REFEREED__POOL__MAX_QUEUE_SIZE", "42");
    let config = ConfigLoader::load_from_file(&config_file);
    std::env::remove_var("REFEREED__POOL__MAX_QUEUE_SIZE");

    assert_eq!(config.unwrap().pool.max_queue_size, 42);
}

#[test]
fn test_rendered_config_loads_back() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = RefereedConfig::default();
    config.pipeline.max_rounds = 5;
    config.pool.workers = 6;

    let rendered = ConfigLoader::to_toml(&config).unwrap();
    let config_file = write_config(&temp_dir, &rendered);
    let loaded = ConfigLoader::load_from_file(&config_file).unwrap();

    assert_eq!(loaded.pipeline.max_rounds, 5);
    assert_eq!(loaded.pool.workers, 6);
    assert_eq!(loaded.pipeline.criteria, config.pipeline.criteria);
}
