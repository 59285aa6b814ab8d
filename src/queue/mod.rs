//! Hierarchical fair-share queue tree.
//!
//! The tree is a composite of [`ParentQueue`]s and [`LeafQueue`]s behind the [`FsQueue`] trait.
//! Leaves hold application attempts; parents hold child queues. Each queue guards its mutable
//! contents (child list or app lists, plus demand) with one `RwLock`:
//! - structural changes and demand updates take the write lock,
//! - share computation, ACL collection and preemption selection take the read lock,
//! - assignment sorts under the write lock, copies the sorted list, then downgrades to the read
//!   lock and walks the copy.
//!
//! Locks are always taken top-down, and no queue re-enters its own lock while holding it.

pub mod acl;
pub mod leaf;
pub mod manager;
pub mod parent;

use crate::app::AppAttempt;
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::policy::{Depth, SchedulingPolicy};
use crate::resource::Resource;
use crate::schedulable::{Schedulable, SchedulerContext};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tracing::info;

pub use acl::{AccessControlList, QueueAcl, QueueUserAclInfo};
pub use leaf::LeafQueue;
pub use manager::QueueManager;
pub use parent::ParentQueue;

/// Name of the tree root.
pub const ROOT_QUEUE: &str = "root";

/// Per-queue settings that a configuration reload may change.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub weight: f64,
    pub min_share: Resource,
    pub max_share: Resource,
    pub max_running_apps: usize,
    pub submit_acl: AccessControlList,
    pub admin_acl: AccessControlList,
}

impl QueueSettings {
    /// Settings for a queue; the root allows everyone unless configured otherwise.
    pub fn from_config(config: &QueueConfig, is_root: bool) -> Self {
        let default_acl = || {
            if is_root {
                AccessControlList::everyone()
            } else {
                AccessControlList::nobody()
            }
        };
        Self {
            weight: config.weight,
            min_share: config.min_share,
            max_share: config.max_share.unwrap_or_else(Resource::unbounded),
            max_running_apps: config.max_running_apps.unwrap_or(usize::MAX),
            submit_acl: config
                .acl_submit_apps
                .as_deref()
                .map(AccessControlList::parse)
                .unwrap_or_else(default_acl),
            admin_acl: config
                .acl_administer_queue
                .as_deref()
                .map(AccessControlList::parse)
                .unwrap_or_else(default_acl),
        }
    }

    /// Settings for a queue created on demand (not present in configuration).
    pub fn dynamic(is_root: bool) -> Self {
        Self::from_config(&QueueConfig::default(), is_root)
    }

    fn acl(&self, acl: QueueAcl) -> &AccessControlList {
        match acl {
            QueueAcl::SubmitApplications => &self.submit_acl,
            QueueAcl::AdministerQueue => &self.admin_acl,
        }
    }
}

/// State every queue variant carries.
pub struct QueueBase {
    name: String,
    serial: u64,
    depth: Depth,
    parent: Option<Weak<ParentQueue>>,
    context: Arc<SchedulerContext>,
    policy: RwLock<Arc<dyn SchedulingPolicy>>,
    settings: RwLock<QueueSettings>,
    fair_share: Mutex<Resource>,
    steady_fair_share: Mutex<Resource>,
}

impl QueueBase {
    pub(crate) fn new(
        name: String,
        depth: Depth,
        parent: Option<&Arc<ParentQueue>>,
        settings: QueueSettings,
        policy: Arc<dyn SchedulingPolicy>,
        context: Arc<SchedulerContext>,
    ) -> Result<Self> {
        if !policy.is_applicable_to(depth) {
            return Err(Error::PolicyNotApplicable {
                policy: policy.name().to_string(),
                queue: name,
            });
        }
        Ok(Self {
            serial: context.next_serial(),
            name,
            depth,
            parent: parent.map(Arc::downgrade),
            context,
            policy: RwLock::new(policy),
            settings: RwLock::new(settings),
            fair_share: Mutex::new(Resource::none()),
            steady_fair_share: Mutex::new(Resource::none()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    pub fn parent(&self) -> Option<Arc<ParentQueue>> {
        self.parent.as_ref()?.upgrade()
    }

    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.context
    }

    pub fn policy(&self) -> Arc<dyn SchedulingPolicy> {
        self.policy.read().clone()
    }

    /// Replace the policy, rejecting one that cannot be used at this depth.
    pub fn set_policy(&self, policy: Arc<dyn SchedulingPolicy>) -> Result<()> {
        if !policy.is_applicable_to(self.depth) {
            return Err(Error::PolicyNotApplicable {
                policy: policy.name().to_string(),
                queue: self.name.clone(),
            });
        }
        let mut current = self.policy.write();
        if current.name() != policy.name() {
            info!(queue = %self.name, old = current.name(), new = policy.name(), "Scheduling policy changed");
        }
        *current = policy;
        Ok(())
    }

    pub fn settings(&self) -> QueueSettings {
        self.settings.read().clone()
    }

    pub fn update_settings(&self, settings: QueueSettings) {
        *self.settings.write() = settings;
    }

    pub fn fair_share(&self) -> Resource {
        *self.fair_share.lock()
    }

    pub fn set_fair_share(&self, share: Resource) {
        *self.fair_share.lock() = share;
    }

    pub fn steady_fair_share(&self) -> Resource {
        *self.steady_fair_share.lock()
    }

    pub fn set_steady_fair_share(&self, share: Resource) {
        *self.steady_fair_share.lock() = share;
    }

    /// Own ACL entry or any ancestor's.
    pub fn has_access(&self, acl: QueueAcl, user: &str) -> bool {
        if self.settings.read().acl(acl).is_user_allowed(user) {
            return true;
        }
        self.parent()
            .map(|parent| parent.base().has_access(acl, user))
            .unwrap_or(false)
    }

    pub fn acl_info(&self, user: &str) -> QueueUserAclInfo {
        QueueUserAclInfo {
            queue_name: self.name.clone(),
            user_acls: QueueAcl::ALL
                .into_iter()
                .filter(|acl| self.has_access(*acl, user))
                .collect(),
        }
    }

    /// Usage below max share in every dimension.
    pub(crate) fn has_headroom(&self, usage: Resource) -> bool {
        let max = self.settings.read().max_share;
        usage.memory_mb < max.memory_mb && usage.vcores < max.vcores
    }

    pub(crate) fn publish_shares(&self) {
        let metrics = self.context.metrics();
        let fair = self.fair_share();
        let steady = self.steady_fair_share();
        metrics.gauge(&self.name, "fair_share_mb", fair.memory_mb as f64);
        metrics.gauge(&self.name, "fair_share_vcores", fair.vcores as f64);
        metrics.gauge(&self.name, "steady_fair_share_mb", steady.memory_mb as f64);
        metrics.gauge(&self.name, "steady_fair_share_vcores", steady.vcores as f64);
    }
}

/// A node of the queue tree.
pub trait FsQueue: Schedulable {
    fn base(&self) -> &QueueBase;

    fn is_leaf(&self) -> bool;

    fn parent(&self) -> Option<Arc<ParentQueue>> {
        self.base().parent()
    }

    fn policy(&self) -> Arc<dyn SchedulingPolicy> {
        self.base().policy()
    }

    fn set_policy(&self, policy: Arc<dyn SchedulingPolicy>) -> Result<()> {
        self.base().set_policy(policy)
    }

    fn steady_fair_share(&self) -> Resource {
        self.base().steady_fair_share()
    }

    fn set_steady_fair_share(&self, share: Resource) {
        self.base().set_steady_fair_share(share);
    }

    fn has_access(&self, acl: QueueAcl, user: &str) -> bool {
        self.base().has_access(acl, user)
    }

    /// Split this queue's fair share between its children, then recurse (pre-order).
    fn recompute_shares(&self);

    /// Same as [`FsQueue::recompute_shares`] for steady shares.
    fn recompute_steady_shares(&self);

    /// ACLs `user` holds on this queue and every queue below it, pre-order.
    fn queue_user_acl_info(&self, user: &str) -> Vec<QueueUserAclInfo>;

    /// Append every application attempt in this subtree to `out`.
    fn collect_apps(&self, out: &mut Vec<Arc<AppAttempt>>);

    fn num_runnable_apps(&self) -> usize;

    fn is_active(&self) -> bool {
        self.num_runnable_apps() > 0
    }
}

/// Implements the [`Schedulable`] accessors that only read [`QueueBase`].
macro_rules! queue_schedulable_common {
    () => {
        fn name(&self) -> &str {
            self.base.name()
        }

        fn serial(&self) -> u64 {
            self.base.serial
        }

        fn weight(&self) -> f64 {
            self.base.settings.read().weight
        }

        fn min_share(&self) -> $crate::resource::Resource {
            self.base.settings.read().min_share
        }

        fn max_share(&self) -> $crate::resource::Resource {
            self.base.settings.read().max_share
        }

        fn fair_share(&self) -> $crate::resource::Resource {
            self.base.fair_share()
        }

        fn set_fair_share(&self, share: $crate::resource::Resource) {
            self.base.set_fair_share(share);
        }
    };
}

pub(crate) use queue_schedulable_common;
