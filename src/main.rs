// Demo binary - drives a fair scheduler and a call queue swap in one process
//
// Loads an optional JSON configuration, runs a few node heartbeats against a small queue tree,
// then swaps the call queue from `fifo` to `fair` while producer and handler threads keep going,
// and prints the collected metrics as JSON.

use fairshare_queue::app::ResourceRequest;
use fairshare_queue::{
    Call, CallQueueManager, Config, FairScheduler, MetricsCollector, QueueConfig, QueueRegistry,
    Resource,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Command-line options parsed from program arguments.
struct CliOptions {
    /// JSON configuration file; built-in defaults when absent
    config_path: Option<String>,
    /// Number of producer threads in the call queue demo
    producers: usize,
}

/// Parse command-line arguments into `CliOptions`.
///
/// Supports `--config=<path>` / `--config <path>` and `--producers=<n>` / `--producers <n>`.
fn parse_cli_options() -> CliOptions {
    let mut config_path = None;
    let mut producers = 4;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let (key, value) = match arg.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (arg.clone(), args.next()),
        };
        match (key.as_str(), value) {
            ("--config", Some(value)) => config_path = Some(value),
            ("--producers", Some(value)) => producers = value.parse().unwrap_or(producers),
            _ => warn!(argument = %arg, "Ignoring unknown argument"),
        }
    }
    CliOptions {
        config_path,
        producers,
    }
}

fn demo_queue_tree() -> QueueConfig {
    QueueConfig::parent(
        "root",
        vec![
            QueueConfig::leaf("batch").with_weight(2.0),
            QueueConfig::leaf("adhoc").with_policy("fifo"),
        ],
    )
}

fn run_scheduler_demo(config: &Config, metrics: Arc<MetricsCollector>) -> fairshare_queue::Result<()> {
    let mut scheduler_config = config.scheduler.clone();
    if scheduler_config.queues.children.is_empty() {
        scheduler_config.queues = demo_queue_tree();
    }
    let scheduler = Arc::new(FairScheduler::new(scheduler_config, metrics)?);
    scheduler.add_node("node-1", Resource::new(8192, 8));
    scheduler.add_node("node-2", Resource::new(8192, 8));
    scheduler.start()?;

    let batch = scheduler.submit_app("app-batch", "root.batch", "alice", 0)?;
    batch.update_request(ResourceRequest::new(1, Resource::new(1024, 1), 12));
    let adhoc = scheduler.submit_app("app-adhoc", "root.adhoc", "bob", 0)?;
    adhoc.update_request(ResourceRequest::new(1, Resource::new(1024, 1), 12));

    for round in 0..8 {
        scheduler.update();
        for node in ["node-1", "node-2"] {
            let assigned = scheduler.node_update(node);
            info!(round, node, resource = %assigned, "Heartbeat");
        }
    }

    if let Some(victim) = scheduler.preempt_container() {
        scheduler.release_container(&victim.app_id, victim.id)?;
    }
    scheduler.stop();
    info!(
        batch = batch.live_containers().len(),
        adhoc = adhoc.live_containers().len(),
        "Containers per application"
    );
    Ok(())
}

fn run_call_queue_demo(
    config: &Config,
    producers: usize,
    metrics: Arc<MetricsCollector>,
) -> fairshare_queue::Result<()> {
    let manager = Arc::new(CallQueueManager::new(
        &config.call_queue,
        Arc::new(QueueRegistry::with_defaults()),
        metrics,
    )?);
    let running = Arc::new(AtomicBool::new(true));
    let next_id = Arc::new(AtomicU64::new(0));
    let handled = Arc::new(AtomicU64::new(0));

    let mut threads = Vec::new();
    for producer in 0..producers {
        let manager = manager.clone();
        let running = running.clone();
        let next_id = next_id.clone();
        threads.push(
            std::thread::Builder::new()
                .name(format!("Producer-{producer}"))
                .spawn(move || {
                    let user = format!("user-{}", producer % 2);
                    while running.load(Ordering::Relaxed) {
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        if manager.put(Call::new(id, user.clone(), "echo")).is_err() {
                            break;
                        }
                        std::thread::sleep(Duration::from_micros(200));
                    }
                })?,
        );
    }
    for handler in 0..2 {
        let manager = manager.clone();
        let handled = handled.clone();
        threads.push(
            std::thread::Builder::new()
                .name(format!("Handler-{handler}"))
                .spawn(move || {
                    while manager.take().is_ok() {
                        handled.fetch_add(1, Ordering::Relaxed);
                    }
                })?,
        );
    }

    std::thread::sleep(Duration::from_millis(200));
    let fair = config.call_queue.clone().with_kind("fair");
    manager.swap_queue(&fair)?;
    std::thread::sleep(Duration::from_millis(200));

    running.store(false, Ordering::Relaxed);
    while manager.size() > 0 {
        std::thread::sleep(Duration::from_millis(5));
    }
    manager.publish_metrics();
    manager.shutdown();
    for thread in threads {
        let _ = thread.join();
    }
    info!(
        produced = next_id.load(Ordering::Relaxed),
        handled = handled.load(Ordering::Relaxed),
        kind = %manager.queue_kind(),
        "Call queue demo finished"
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let options = parse_cli_options();
    let config = match &options.config_path {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    let metrics = MetricsCollector::shared();
    run_scheduler_demo(&config, metrics.clone())?;
    run_call_queue_demo(&config, options.producers, metrics.clone())?;

    println!("{}", metrics.to_json()?);
    Ok(())
}
