use crate::config::models::{AppConfig, QueueBackend};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[queue]
backend = "memory"
retry_delay_ms = 10

[worker]
stop_grace_seconds = 5
"#
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config = AppConfig::load(Some(&path)).unwrap();

    assert_eq!(config.queue.backend, QueueBackend::Memory);
    assert_eq!(config.queue.retry_delay_ms, 10);
    assert_eq!(config.worker.stop_grace_seconds, 5);
    assert_eq!(config.worker.concurrency, 2);
}

#[test]
fn test_load_missing_file_fails() {
    let result = AppConfig::load(Some("/nonexistent/taskq.toml"));
    assert!(result.is_err());
}

#[test]
fn test_environment_override() {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap().to_string();

    std::env::set_var("TASKQ__MONITOR__REAP_BATCH_SIZE", "42");
    let config = AppConfig::load(Some(&path));
    std::env::remove_var("TASKQ__MONITOR__REAP_BATCH_SIZE");

    let config = config.unwrap();
    assert_eq!(config.monitor.reap_batch_size, 42);
}
