//! Leaf queues: hold application attempts directly.

use super::{FsQueue, ParentQueue, QueueBase, QueueSettings, QueueUserAclInfo};
use crate::app::AppAttempt;
use crate::error::Result;
use crate::policy::{Depth, SchedulingPolicy, ShareInput};
use crate::resource::Resource;
use crate::schedulable::{
    Container, Schedulable, SchedulableSnapshot, SchedulerContext, SchedulerNode,
};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct LeafInner {
    runnable: Vec<Arc<AppAttempt>>,
    /// Parked by `max_running_apps`, in submission order.
    non_runnable: Vec<Arc<AppAttempt>>,
    demand: Resource,
}

/// A queue whose children are application attempts.
pub struct LeafQueue {
    base: QueueBase,
    inner: RwLock<LeafInner>,
}

impl LeafQueue {
    pub fn new(
        name: impl Into<String>,
        parent: &Arc<ParentQueue>,
        settings: QueueSettings,
        policy: Arc<dyn SchedulingPolicy>,
        context: Arc<SchedulerContext>,
    ) -> Result<Arc<Self>> {
        let base = QueueBase::new(
            name.into(),
            Depth::LEAF,
            Some(parent),
            settings,
            policy,
            context,
        )?;
        Ok(Arc::new(Self {
            base,
            inner: RwLock::new(LeafInner::default()),
        }))
    }

    /// Add an attempt; returns `true` if it is runnable right away.
    pub fn add_app(&self, app: Arc<AppAttempt>) -> bool {
        let limit = self.base.settings().max_running_apps;
        let mut inner = self.inner.write();
        if inner.runnable.len() < limit {
            inner.runnable.push(app);
            true
        } else {
            debug!(queue = %self.base.name(), app = %app.id(), "Application parked as non-runnable");
            inner.non_runnable.push(app);
            false
        }
    }

    /// Remove an attempt by id, promoting parked attempts into the freed slot.
    pub fn remove_app(&self, app_id: &str) -> Option<Arc<AppAttempt>> {
        let limit = self.base.settings().max_running_apps;
        let mut inner = self.inner.write();
        let removed = if let Some(pos) = inner.runnable.iter().position(|a| a.id() == app_id) {
            Some(inner.runnable.remove(pos))
        } else {
            inner
                .non_runnable
                .iter()
                .position(|a| a.id() == app_id)
                .map(|pos| inner.non_runnable.remove(pos))
        };
        Self::promote(&mut inner, limit);
        removed
    }

    /// Re-apply `max_running_apps` after a settings change.
    pub fn promote_runnable(&self) {
        let limit = self.base.settings().max_running_apps;
        let mut inner = self.inner.write();
        Self::promote(&mut inner, limit);
    }

    fn promote(inner: &mut RwLockWriteGuard<'_, LeafInner>, limit: usize) {
        while inner.runnable.len() < limit && !inner.non_runnable.is_empty() {
            let app = inner.non_runnable.remove(0);
            inner.runnable.push(app);
        }
    }

    pub fn runnable_apps(&self) -> Vec<Arc<AppAttempt>> {
        self.inner.read().runnable.clone()
    }

    pub fn non_runnable_apps(&self) -> Vec<Arc<AppAttempt>> {
        self.inner.read().non_runnable.clone()
    }

    pub fn num_apps(&self) -> usize {
        let inner = self.inner.read();
        inner.runnable.len() + inner.non_runnable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_apps() == 0
    }
}

impl Schedulable for LeafQueue {
    super::queue_schedulable_common!();

    fn demand(&self) -> Resource {
        self.inner.read().demand
    }

    fn resource_usage(&self) -> Resource {
        let inner = self.inner.read();
        inner
            .runnable
            .iter()
            .chain(inner.non_runnable.iter())
            .fold(Resource::none(), |sum, app| sum + app.resource_usage())
    }

    /// Sum of every attempt's usage plus outstanding requests, clamped to max share.
    fn update_demand(&self) {
        let max = self.max_share();
        let mut inner = self.inner.write();
        let mut demand = Resource::none();
        for app in inner.runnable.iter().chain(inner.non_runnable.iter()) {
            app.update_demand();
            demand = (demand + app.demand()).componentwise_min(max);
            if demand == max {
                break;
            }
        }
        inner.demand = demand;
    }

    fn assign_container(&self, node: &SchedulerNode) -> Resource {
        if !self.base.has_headroom(self.resource_usage()) {
            return Resource::none();
        }
        let policy = self.base.policy();
        let cluster = self.base.context().cluster_resource();

        let mut inner = self.inner.write();
        if inner.runnable.is_empty() {
            return Resource::none();
        }
        let mut keyed: Vec<(SchedulableSnapshot, Arc<AppAttempt>)> = inner
            .runnable
            .iter()
            .map(|app| (SchedulableSnapshot::of(app.as_ref()), app.clone()))
            .collect();
        keyed.sort_by(|a, b| policy.compare(&a.0, &b.0, &cluster));
        inner.runnable = keyed.into_iter().map(|(_, app)| app).collect();
        let ordered = inner.runnable.clone();
        let _inner = RwLockWriteGuard::downgrade(inner);

        for app in &ordered {
            if !app.has_pending_requests() {
                continue;
            }
            let assigned = app.assign_container(node);
            if !assigned.is_none() {
                self.base
                    .context()
                    .metrics()
                    .increment(self.base.name(), "containers_assigned", 1);
                return assigned;
            }
        }
        Resource::none()
    }

    /// Only a leaf over its fair share (as judged by the parent's policy) gives up a container.
    fn preempt_container(&self) -> Option<Container> {
        let parent = self.base.parent()?;
        let usage = self.resource_usage();
        let fair_share = self.fair_share();
        if !parent
            .base()
            .policy()
            .is_usage_over_fair_share(&usage, &fair_share)
        {
            return None;
        }

        let policy = self.base.policy();
        let cluster = self.base.context().cluster_resource();
        let candidate = {
            let inner = self.inner.read();
            let mut best: Option<(SchedulableSnapshot, Arc<AppAttempt>)> = None;
            for app in &inner.runnable {
                let snapshot = SchedulableSnapshot::of(app.as_ref());
                let replace = match &best {
                    None => true,
                    Some((current, _)) => {
                        policy.compare(&snapshot, current, &cluster) == Ordering::Greater
                    }
                };
                if replace {
                    best = Some((snapshot, app.clone()));
                }
            }
            best.map(|(_, app)| app)
        }?;
        debug!(queue = %self.base.name(), app = %candidate.id(), "Preemption candidate");
        candidate.preempt_container()
    }
}

impl FsQueue for LeafQueue {
    fn base(&self) -> &QueueBase {
        &self.base
    }

    fn is_leaf(&self) -> bool {
        true
    }

    /// Split the queue's share between its runnable attempts.
    fn recompute_shares(&self) {
        let policy = self.base.policy();
        let inner = self.inner.read();
        let inputs: Vec<ShareInput> = inner
            .runnable
            .iter()
            .map(|app| ShareInput::from_schedulable(app.as_ref(), true))
            .collect();
        let shares = policy.compute_shares(&inputs, self.base.fair_share());
        for (app, share) in inner.runnable.iter().zip(shares) {
            app.set_fair_share(share);
        }
    }

    fn recompute_steady_shares(&self) {}

    fn queue_user_acl_info(&self, user: &str) -> Vec<QueueUserAclInfo> {
        vec![self.base.acl_info(user)]
    }

    fn collect_apps(&self, out: &mut Vec<Arc<AppAttempt>>) {
        let inner = self.inner.read();
        out.extend(inner.runnable.iter().cloned());
        out.extend(inner.non_runnable.iter().cloned());
    }

    fn num_runnable_apps(&self) -> usize {
        self.inner.read().runnable.len()
    }
}
