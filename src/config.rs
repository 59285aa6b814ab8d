//! Configuration objects.
//!
//! Every knob has a default so a partial JSON document is enough; missing fields fall back to
//! the values below. The configuration is read once per construction, reload or swap and is
//! never watched.

use crate::error::{Error, Result};
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the demo binary and tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub call_queue: CallQueueConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Fair scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the demand / fair share update loop.
    pub update_interval_ms: u64,
    /// Keep assigning on one heartbeat until the node is full.
    pub assign_multiple: bool,
    /// Upper bound on containers per heartbeat when `assign_multiple` is set.
    pub max_assign: Option<usize>,
    /// Queue tree, rooted at `root`.
    pub queues: QueueConfig,
}

impl SchedulerConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 500,
            assign_multiple: false,
            max_assign: None,
            queues: QueueConfig::default(),
        }
    }
}

/// One queue and, recursively, its children.
///
/// A queue with children (or with `parent` set) is a parent queue, anything else is a leaf.
/// Names are relative to the enclosing queue; the top-level entry must be `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub weight: f64,
    pub min_share: Resource,
    pub max_share: Option<Resource>,
    /// `fair`, `drf` or `fifo`; inherits `fair` when unset.
    pub policy: Option<String>,
    pub max_running_apps: Option<usize>,
    /// `*` for everyone, otherwise a comma separated user list.
    pub acl_submit_apps: Option<String>,
    pub acl_administer_queue: Option<String>,
    /// Force a parent queue even without configured children.
    pub parent: bool,
    pub children: Vec<QueueConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "root".to_string(),
            weight: 1.0,
            min_share: Resource::none(),
            max_share: None,
            policy: None,
            max_running_apps: None,
            acl_submit_apps: None,
            acl_administer_queue: None,
            parent: false,
            children: Vec::new(),
        }
    }
}

impl QueueConfig {
    /// Leaf queue with default settings.
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parent queue holding `children`.
    pub fn parent(name: impl Into<String>, children: Vec<QueueConfig>) -> Self {
        Self {
            name: name.into(),
            parent: true,
            children,
            ..Self::default()
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_min_share(mut self, min_share: Resource) -> Self {
        self.min_share = min_share;
        self
    }

    pub fn with_max_share(mut self, max_share: Resource) -> Self {
        self.max_share = Some(max_share);
        self
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn with_max_running_apps(mut self, limit: usize) -> Self {
        self.max_running_apps = Some(limit);
        self
    }

    pub fn with_submit_acl(mut self, acl: impl Into<String>) -> Self {
        self.acl_submit_apps = Some(acl.into());
        self
    }

    pub fn is_parent(&self) -> bool {
        self.parent || !self.children.is_empty()
    }
}

/// Call queue manager and backing queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallQueueConfig {
    /// Registry key of the backing queue (`fifo`, `fair`, or anything registered).
    pub kind: String,
    pub capacity: usize,
    pub namespace: String,
    /// Reject instead of block when the queue is full.
    pub client_backoff: bool,
    /// Bounded wait used by `take` between reference re-reads.
    pub take_poll_interval_ms: u64,
    pub drain: DrainConfig,
    pub fair: FairCallQueueConfig,
}

impl CallQueueConfig {
    pub fn take_poll_interval(&self) -> Duration {
        Duration::from_millis(self.take_poll_interval_ms.max(1))
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl Default for CallQueueConfig {
    fn default() -> Self {
        Self {
            kind: "fifo".to_string(),
            capacity: 1000,
            namespace: "ipc".to_string(),
            client_backoff: false,
            take_poll_interval_ms: 10,
            drain: DrainConfig::default(),
            fair: FairCallQueueConfig::default(),
        }
    }
}

/// Debounce settings of the drain probe run during a swap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// Consecutive empty observations required.
    pub checks: usize,
    /// Pause before each observation.
    pub interval_ms: u64,
}

impl DrainConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// At least one empty observation must precede moving consumers off a queue.
    pub fn validate(&self) -> Result<()> {
        if self.checks == 0 {
            return Err(Error::InvalidConfig {
                field: "drain.checks",
                reason: "at least one empty observation is required".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            checks: 20,
            interval_ms: 10,
        }
    }
}

/// Multi-level fair call queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FairCallQueueConfig {
    pub levels: usize,
    /// Round-robin weight per level; defaults to `2^(levels-1-i)`.
    pub weights: Option<Vec<usize>>,
    /// Share-of-calls thresholds, `levels - 1` ascending values; defaults to `1/2^(levels-1) .. 1/2`.
    pub thresholds: Option<Vec<f64>>,
    pub decay_factor: f64,
    pub decay_period_ms: u64,
}

impl FairCallQueueConfig {
    pub fn resolved_weights(&self) -> Vec<usize> {
        self.weights.clone().unwrap_or_else(|| {
            (0..self.levels)
                .map(|level| 1usize << (self.levels - 1 - level).min(usize::BITS as usize - 1))
                .collect()
        })
    }

    pub fn resolved_thresholds(&self) -> Vec<f64> {
        self.thresholds.clone().unwrap_or_else(|| {
            let levels = self.levels.max(1);
            (1..levels)
                .map(|i| 1.0 / 2f64.powi((levels - i) as i32))
                .collect()
        })
    }

    pub fn decay_period(&self) -> Duration {
        Duration::from_millis(self.decay_period_ms)
    }
}

impl Default for FairCallQueueConfig {
    fn default() -> Self {
        Self {
            levels: 4,
            weights: None,
            thresholds: None,
            decay_factor: 0.5,
            decay_period_ms: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = Config::from_json_str(r#"{"call_queue": {"capacity": 8}}"#).unwrap();
        assert_eq!(config.call_queue.capacity, 8);
        assert_eq!(config.call_queue.kind, "fifo");
        assert_eq!(config.call_queue.drain.checks, 20);
        assert_eq!(config.scheduler.queues.name, "root");
    }

    #[test]
    fn test_fair_defaults_follow_level_count() {
        let fair = FairCallQueueConfig::default();
        assert_eq!(fair.resolved_weights(), vec![8, 4, 2, 1]);
        assert_eq!(fair.resolved_thresholds(), vec![0.125, 0.25, 0.5]);
    }

    #[test]
    fn test_zero_drain_checks_are_rejected() {
        let drain = DrainConfig {
            checks: 0,
            interval_ms: 1,
        };
        assert!(matches!(
            drain.validate(),
            Err(Error::InvalidConfig { field: "drain.checks", .. })
        ));
        assert!(DrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_nested_queues_parse() {
        let json = r#"{
            "scheduler": {
                "queues": {
                    "name": "root",
                    "children": [
                        {"name": "batch", "weight": 2.0, "max_share": {"memory_mb": 4096, "vcores": 8}},
                        {"name": "adhoc", "policy": "fifo"}
                    ]
                }
            }
        }"#;
        let config = Config::from_json_str(json).unwrap();
        let root = &config.scheduler.queues;
        assert!(root.is_parent());
        assert_eq!(root.children[0].weight, 2.0);
        assert_eq!(root.children[0].max_share, Some(Resource::new(4096, 8)));
        assert_eq!(root.children[1].policy.as_deref(), Some("fifo"));
    }

    #[test]
    fn test_bad_json_is_an_error() {
        assert!(Config::from_json_str("{").is_err());
    }
}
