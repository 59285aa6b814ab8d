//! Parent queues: interior nodes of the tree, including the root.

use super::{FsQueue, QueueBase, QueueSettings, QueueUserAclInfo};
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

#[derive(Default)]
struct ParentInner {
    children: Vec<Arc<dyn FsQueue>>,
    demand: Resource,
}

/// A queue whose children are other queues.
pub struct ParentQueue {
    base: QueueBase,
    inner: RwLock<ParentInner>,
}

impl ParentQueue {
    /// Create a parent queue; without `parent` it becomes the tree root.
    pub fn new(
        name: impl Into<String>,
        parent: Option<&Arc<ParentQueue>>,
        settings: QueueSettings,
        policy: Arc<dyn SchedulingPolicy>,
        context: Arc<SchedulerContext>,
    ) -> Result<Arc<Self>> {
        let depth = if parent.is_some() {
            Depth::INTERMEDIATE
        } else {
            Depth::ROOT
        };
        let base = QueueBase::new(name.into(), depth, parent, settings, policy, context)?;
        Ok(Arc::new(Self {
            base,
            inner: RwLock::new(ParentInner::default()),
        }))
    }

    pub fn add_child(&self, child: Arc<dyn FsQueue>) {
        self.inner.write().children.push(child);
    }

    pub fn remove_child(&self, name: &str) -> Option<Arc<dyn FsQueue>> {
        let mut inner = self.inner.write();
        let position = inner.children.iter().position(|c| c.name() == name)?;
        Some(inner.children.remove(position))
    }

    pub fn children(&self) -> Vec<Arc<dyn FsQueue>> {
        self.inner.read().children.clone()
    }

    fn split_shares(&self, total: Resource, steady: bool) {
        let policy = self.base.policy();
        let inner = self.inner.read();
        let inputs: Vec<ShareInput> = inner
            .children
            .iter()
            .map(|child| ShareInput::from_schedulable(child.as_ref(), steady || child.is_active()))
            .collect();
        let shares = if steady {
            policy.compute_steady_shares(&inputs, total)
        } else {
            policy.compute_shares(&inputs, total)
        };
        for (child, share) in inner.children.iter().zip(shares) {
            if steady {
                child.set_steady_fair_share(share);
            } else {
                child.set_fair_share(share);
            }
        }
        for child in &inner.children {
            child.base().publish_shares();
            if steady {
                child.recompute_steady_shares();
            } else {
                child.recompute_shares();
            }
        }
    }
}

impl Schedulable for ParentQueue {
    super::queue_schedulable_common!();

    fn demand(&self) -> Resource {
        self.inner.read().demand
    }

    fn resource_usage(&self) -> Resource {
        self.inner
            .read()
            .children
            .iter()
            .fold(Resource::none(), |sum, child| sum + child.resource_usage())
    }

    /// Children's demand summed and clamped to max share.
    ///
    /// Stops at the first child that saturates the clamp; later children keep their previous
    /// demand until the next update that reaches them.
    fn update_demand(&self) {
        let max = self.max_share();
        let mut inner = self.inner.write();
        let mut demand = Resource::none();
        for child in &inner.children {
            child.update_demand();
            demand = (demand + child.demand()).componentwise_min(max);
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
        if inner.children.is_empty() {
            return Resource::none();
        }
        let mut keyed: Vec<(SchedulableSnapshot, Arc<dyn FsQueue>)> = inner
            .children
            .iter()
            .map(|child| (SchedulableSnapshot::of(child.as_ref()), child.clone()))
            .collect();
        keyed.sort_by(|a, b| policy.compare(&a.0, &b.0, &cluster));
        inner.children = keyed.into_iter().map(|(_, child)| child).collect();
        let ordered = inner.children.clone();
        // Readers (share updates, ACL queries) may proceed while children assign.
        let _inner = RwLockWriteGuard::downgrade(inner);

        for child in &ordered {
            let assigned = child.assign_container(node);
            if !assigned.is_none() {
                return assigned;
            }
        }
        Resource::none()
    }

    /// Delegate to the child the policy ranks last.
    fn preempt_container(&self) -> Option<Container> {
        let policy = self.base.policy();
        let cluster = self.base.context().cluster_resource();
        let candidate = {
            let inner = self.inner.read();
            let mut best: Option<(SchedulableSnapshot, Arc<dyn FsQueue>)> = None;
            for child in &inner.children {
                let snapshot = SchedulableSnapshot::of(child.as_ref());
                let replace = match &best {
                    None => true,
                    Some((current, _)) => {
                        policy.compare(&snapshot, current, &cluster) == Ordering::Greater
                    }
                };
                if replace {
                    best = Some((snapshot, child.clone()));
                }
            }
            best.map(|(_, child)| child)
        }?;
        candidate.preempt_container()
    }
}

impl FsQueue for ParentQueue {
    fn base(&self) -> &QueueBase {
        &self.base
    }

    fn is_leaf(&self) -> bool {
        false
    }

    fn recompute_shares(&self) {
        self.split_shares(self.base.fair_share(), false);
    }

    fn recompute_steady_shares(&self) {
        self.split_shares(self.base.steady_fair_share(), true);
    }

    fn queue_user_acl_info(&self, user: &str) -> Vec<QueueUserAclInfo> {
        let mut infos = vec![self.base.acl_info(user)];
        for child in self.inner.read().children.iter() {
            infos.extend(child.queue_user_acl_info(user));
        }
        infos
    }

    fn collect_apps(&self, out: &mut Vec<Arc<AppAttempt>>) {
        for child in self.inner.read().children.iter() {
            child.collect_apps(out);
        }
    }

    fn num_runnable_apps(&self) -> usize {
        self.inner
            .read()
            .children
            .iter()
            .map(|child| child.num_runnable_apps())
            .sum()
    }
}
