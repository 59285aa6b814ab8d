//! The schedulable-entity contract shared by queues and application attempts.
//!
//! Anything the fair scheduler can rank and hand resources to implements [`Schedulable`]. The
//! scheduling policies only ever see this trait, so the same comparator orders sibling queues
//! inside a parent and application attempts inside a leaf.

use crate::metrics::MetricsSink;
use crate::resource::Resource;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic serial number source, one per scheduler instance.
///
/// Serials order entities by submission time and break comparator ties, so they must be unique
/// and increasing. Relaxed ordering is enough: uniqueness comes from `fetch_add`, and no other
/// memory is published through the counter.
#[derive(Debug, Default)]
pub struct SerialAllocator {
    next: AtomicU64,
}

impl SerialAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next serial.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Scheduler-wide state every queue and application attempt can reach.
pub struct SchedulerContext {
    serials: SerialAllocator,
    container_ids: AtomicU64,
    cluster: RwLock<Resource>,
    metrics: Arc<dyn MetricsSink>,
}

impl SchedulerContext {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            serials: SerialAllocator::new(),
            container_ids: AtomicU64::new(1),
            cluster: RwLock::new(Resource::none()),
            metrics,
        }
    }

    pub fn next_serial(&self) -> u64 {
        self.serials.next()
    }

    pub fn next_container_id(&self) -> u64 {
        self.container_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Total capacity of all registered nodes.
    pub fn cluster_resource(&self) -> Resource {
        *self.cluster.read()
    }

    pub fn set_cluster_resource(&self, total: Resource) {
        *self.cluster.write() = total;
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }
}

/// A running allocation handed out by [`Schedulable::assign_container`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Container {
    pub id: u64,
    pub app_id: String,
    pub queue: String,
    pub node_id: String,
    pub resource: Resource,
    /// Request priority; lower numbers are more important.
    pub priority: u32,
}

/// A cluster node as seen by the scheduler: an id, a total capacity and what is allocated.
#[derive(Debug)]
pub struct SchedulerNode {
    id: String,
    total: Resource,
    allocated: Mutex<Resource>,
}

impl SchedulerNode {
    pub fn new(id: impl Into<String>, total: Resource) -> Self {
        Self {
            id: id.into(),
            total,
            allocated: Mutex::new(Resource::none()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn total(&self) -> Resource {
        self.total
    }

    /// Free capacity right now.
    pub fn available(&self) -> Resource {
        self.total - *self.allocated.lock()
    }

    /// Reserve `request` on this node if it still fits.
    ///
    /// Check and update happen under one lock so two heartbeat threads cannot both claim the
    /// last slot.
    pub fn try_allocate(&self, request: Resource) -> bool {
        let mut allocated = self.allocated.lock();
        if request.fits_in(&(self.total - *allocated)) {
            *allocated += request;
            true
        } else {
            false
        }
    }

    pub fn release(&self, resource: Resource) {
        *self.allocated.lock() -= resource;
    }
}

/// Anything that can be ordered by a scheduling policy and assigned resources.
pub trait Schedulable: Send + Sync {
    /// Stable identity (full queue path or application id).
    fn name(&self) -> &str;

    /// Submission serial used as the final tie-break.
    fn serial(&self) -> u64;

    /// Larger values are scheduled first by the FIFO policy.
    fn priority(&self) -> u32 {
        0
    }

    fn weight(&self) -> f64 {
        1.0
    }

    fn min_share(&self) -> Resource {
        Resource::none()
    }

    fn max_share(&self) -> Resource {
        Resource::unbounded()
    }

    /// Demand computed by the last [`Schedulable::update_demand`] call.
    fn demand(&self) -> Resource;

    /// Resources currently held.
    fn resource_usage(&self) -> Resource;

    fn fair_share(&self) -> Resource;

    fn set_fair_share(&self, share: Resource);

    /// Refresh [`Schedulable::demand`] from current usage and outstanding requests.
    fn update_demand(&self);

    /// Try to place work on `node`; returns what was assigned or [`Resource::none`].
    fn assign_container(&self, node: &SchedulerNode) -> Resource;

    /// Pick a running container to reclaim, if any.
    fn preempt_container(&self) -> Option<Container>;
}

/// Point-in-time copy of the values a comparator reads.
///
/// Usage moves while heartbeats run on other threads; sorting live values could hand the sort
/// an inconsistent order. Sorts compare snapshots taken once per entity instead.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulableSnapshot {
    pub name: String,
    pub serial: u64,
    pub priority: u32,
    pub weight: f64,
    pub min_share: Resource,
    pub max_share: Resource,
    pub demand: Resource,
    pub usage: Resource,
    pub fair_share: Resource,
}

impl SchedulableSnapshot {
    pub fn of<S: Schedulable + ?Sized>(schedulable: &S) -> Self {
        Self {
            name: schedulable.name().to_string(),
            serial: schedulable.serial(),
            priority: schedulable.priority(),
            weight: schedulable.weight(),
            min_share: schedulable.min_share(),
            max_share: schedulable.max_share(),
            demand: schedulable.demand(),
            usage: schedulable.resource_usage(),
            fair_share: schedulable.fair_share(),
        }
    }

    /// Snapshot with the given usage and defaults elsewhere.
    pub fn with_usage(name: &str, serial: u64, usage: Resource) -> Self {
        Self {
            name: name.to_string(),
            serial,
            priority: 0,
            weight: 1.0,
            min_share: Resource::none(),
            max_share: Resource::unbounded(),
            demand: usage,
            usage,
            fair_share: Resource::none(),
        }
    }
}

impl Schedulable for SchedulableSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn serial(&self) -> u64 {
        self.serial
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn min_share(&self) -> Resource {
        self.min_share
    }

    fn max_share(&self) -> Resource {
        self.max_share
    }

    fn demand(&self) -> Resource {
        self.demand
    }

    fn resource_usage(&self) -> Resource {
        self.usage
    }

    fn fair_share(&self) -> Resource {
        self.fair_share
    }

    // Snapshots are read-only.
    fn set_fair_share(&self, _share: Resource) {}

    fn update_demand(&self) {}

    fn assign_container(&self, _node: &SchedulerNode) -> Resource {
        Resource::none()
    }

    fn preempt_container(&self) -> Option<Container> {
        None
    }
}
