use std::io::Write;
use std::sync::Arc;

use fairshare_queue::config::Config;
use fairshare_queue::metrics::NoopMetrics;
use fairshare_queue::queue::FsQueue;
use fairshare_queue::resource::Resource;
use fairshare_queue::schedulable::Schedulable;
use fairshare_queue::{Error, FairScheduler};

const CLUSTER_CONFIG: &str = r#"{
    "scheduler": {
        "update_interval_ms": 100,
        "assign_multiple": true,
        "queues": {
            "name": "root",
            "policy": "drf",
            "children": [
                {"name": "prod", "weight": 3.0, "min_share": {"memory_mb": 2048, "vcores": 2}},
                {"name": "dev", "max_share": {"memory_mb": 4096, "vcores": 4},
                 "children": [{"name": "alice", "policy": "fifo"}]}
            ]
        }
    },
    "call_queue": {"kind": "fair", "capacity": 64, "client_backoff": true,
                   "fair": {"levels": 2, "decay_period_ms": 1000}}
}"#;

#[test]
fn test_load_from_file_and_build_scheduler() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CLUSTER_CONFIG.as_bytes()).unwrap();

    let config = Config::from_path(file.path()).unwrap();
    assert!(config.scheduler.assign_multiple);
    assert_eq!(config.call_queue.kind, "fair");
    assert_eq!(config.call_queue.fair.resolved_weights(), vec![2, 1]);
    assert_eq!(config.call_queue.drain.checks, 20);

    let scheduler = FairScheduler::new(config.scheduler, Arc::new(NoopMetrics)).unwrap();
    let queues = scheduler.queue_manager();
    assert_eq!(
        queues.queue_names(),
        vec!["root", "root.dev", "root.dev.alice", "root.prod"]
    );
    let prod = queues.get_queue("root.prod").unwrap();
    assert_eq!(prod.weight(), 3.0);
    assert_eq!(prod.min_share(), Resource::new(2048, 2));
    assert_eq!(queues.get_queue("root.dev").unwrap().max_share(), Resource::new(4096, 4));
    assert_eq!(queues.root().policy().name(), "drf");
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::from_path(dir.path().join("absent.json"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_malformed_file_is_a_json_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{\"scheduler\": [").unwrap();
    assert!(matches!(Config::from_path(file.path()), Err(Error::Json(_))));
}
