//! Hierarchical fair-share scheduling and hot-swappable RPC call queues.
//!
//! - [`scheduler::FairScheduler`] ranks applications through a tree of weighted queues and
//!   hands node capacity to the most deserving one.
//! - [`ipc::CallQueueManager`] fronts a bounded call queue whose implementation and capacity
//!   can be replaced while producers and handlers keep running.

pub mod app;
pub mod config;
pub mod error;
pub mod ipc;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod resource;
pub mod schedulable;
pub mod scheduler;

// Re-export for easier testing
pub use config::{CallQueueConfig, Config, QueueConfig, SchedulerConfig};
pub use error::{Error, Result};
pub use ipc::{Call, CallQueueManager, QueueRegistry, SwapState};
pub use metrics::{MetricsCollector, MetricsSink, NoopMetrics};
pub use resource::Resource;
pub use scheduler::FairScheduler;
