//! Application attempts: the schedulable entities held by leaf queues.
//!
//! An attempt carries outstanding [`ResourceRequest`]s and the containers already allocated to
//! it. Leaf queues rank attempts with their policy and let the winner place one container on a
//! node per call.

use crate::resource::{Resource, ResourceUsage};
use crate::schedulable::{Container, Schedulable, SchedulerContext, SchedulerNode};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Ask for `num_containers` containers of `capability` at request priority `priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Lower numbers are served first.
    pub priority: u32,
    pub capability: Resource,
    pub num_containers: u32,
}

impl ResourceRequest {
    pub fn new(priority: u32, capability: Resource, num_containers: u32) -> Self {
        Self {
            priority,
            capability,
            num_containers,
        }
    }

    fn outstanding(&self) -> Resource {
        self.capability.scale(self.num_containers as f64)
    }
}

#[derive(Debug, Default)]
struct AttemptState {
    /// Outstanding requests keyed by request priority.
    requests: BTreeMap<u32, ResourceRequest>,
    live: Vec<Container>,
    /// Containers already handed to the preemption monitor.
    preempting: HashSet<u64>,
    demand: Resource,
    fair_share: Resource,
}

/// A running application attempt inside one leaf queue.
pub struct AppAttempt {
    id: String,
    user: String,
    queue: String,
    serial: u64,
    priority: u32,
    weight: f64,
    usage: ResourceUsage,
    state: Mutex<AttemptState>,
    context: Arc<SchedulerContext>,
}

impl AppAttempt {
    pub fn new(
        id: impl Into<String>,
        user: impl Into<String>,
        queue: impl Into<String>,
        priority: u32,
        context: Arc<SchedulerContext>,
    ) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            queue: queue.into(),
            serial: context.next_serial(),
            priority,
            weight: 1.0,
            usage: ResourceUsage::new(),
            state: Mutex::new(AttemptState::default()),
            context,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Per-label usage accounting for this attempt.
    pub fn usage(&self) -> &ResourceUsage {
        &self.usage
    }

    /// Add or replace the request at `request.priority`.
    pub fn update_request(&self, request: ResourceRequest) {
        let mut state = self.state.lock();
        if let Some(previous) = state.requests.remove(&request.priority) {
            self.usage.dec_pending(previous.outstanding());
        }
        if request.num_containers > 0 {
            self.usage.inc_pending(request.outstanding());
            state.requests.insert(request.priority, request);
        }
    }

    pub fn has_pending_requests(&self) -> bool {
        self.state
            .lock()
            .requests
            .values()
            .any(|request| request.num_containers > 0)
    }

    pub fn live_containers(&self) -> Vec<Container> {
        self.state.lock().live.clone()
    }

    /// Drop a container (completed or reclaimed) and return it.
    ///
    /// The caller is responsible for releasing the node side of the allocation.
    pub fn release_container(&self, container_id: u64) -> Option<Container> {
        let mut state = self.state.lock();
        let position = state.live.iter().position(|c| c.id == container_id)?;
        let container = state.live.remove(position);
        state.preempting.remove(&container_id);
        self.usage.dec_used(container.resource);
        Some(container)
    }

    /// Drop every live container, returning them for node-side release.
    pub fn release_all(&self) -> Vec<Container> {
        let mut state = self.state.lock();
        let containers = std::mem::take(&mut state.live);
        state.preempting.clear();
        for container in &containers {
            self.usage.dec_used(container.resource);
        }
        containers
    }
}

impl Schedulable for AppAttempt {
    fn name(&self) -> &str {
        &self.id
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

    fn demand(&self) -> Resource {
        self.state.lock().demand
    }

    fn resource_usage(&self) -> Resource {
        self.usage.used()
    }

    fn fair_share(&self) -> Resource {
        self.state.lock().fair_share
    }

    fn set_fair_share(&self, share: Resource) {
        self.state.lock().fair_share = share;
    }

    fn update_demand(&self) {
        let demand = self.usage.used() + self.usage.pending();
        self.state.lock().demand = demand;
    }

    /// Place the most important request that fits on `node`.
    fn assign_container(&self, node: &SchedulerNode) -> Resource {
        let mut state = self.state.lock();
        let candidate = state
            .requests
            .values()
            .find(|request| request.num_containers > 0 && request.capability.fits_in(&node.available()))
            .copied();
        let Some(request) = candidate else {
            return Resource::none();
        };
        if !node.try_allocate(request.capability) {
            return Resource::none();
        }

        let container = Container {
            id: self.context.next_container_id(),
            app_id: self.id.clone(),
            queue: self.queue.clone(),
            node_id: node.id().to_string(),
            resource: request.capability,
            priority: request.priority,
        };
        debug!(app = %self.id, container = container.id, node = %node.id(), resource = %request.capability, "Allocated container");

        if let Some(entry) = state.requests.get_mut(&request.priority) {
            entry.num_containers -= 1;
            if entry.num_containers == 0 {
                state.requests.remove(&request.priority);
            }
        }
        state.live.push(container);
        self.usage.dec_pending(request.capability);
        self.usage.inc_used(request.capability);
        request.capability
    }

    /// Lowest-priority container first, newest among equals; skips ones already selected.
    fn preempt_container(&self) -> Option<Container> {
        let mut state = self.state.lock();
        let victim = state
            .live
            .iter()
            .filter(|container| !state.preempting.contains(&container.id))
            .max_by_key(|container| (container.priority, container.id))
            .cloned()?;
        state.preempting.insert(victim.id);
        Some(victim)
    }
}
