//! Fair scheduler facade.
//!
//! Owns the queue tree, the node registry and the application index. Node heartbeats call
//! [`FairScheduler::node_update`]; a background thread started by [`FairScheduler::start`]
//! refreshes demand and fair shares every `update_interval_ms`.

use crate::app::AppAttempt;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use crate::queue::{FsQueue, QueueAcl, QueueManager, QueueUserAclInfo};
use crate::resource::Resource;
use crate::schedulable::{Container, Schedulable, SchedulerContext, SchedulerNode};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest pause of the update thread between shutdown checks.
const UPDATE_THREAD_TICK: Duration = Duration::from_millis(10);

pub struct FairScheduler {
    context: Arc<SchedulerContext>,
    config: RwLock<SchedulerConfig>,
    queues: QueueManager,
    nodes: RwLock<HashMap<String, Arc<SchedulerNode>>>,
    apps: RwLock<HashMap<String, Arc<AppAttempt>>>,
    /// Lock-free flag read by the update thread.
    running: Arc<AtomicBool>,
    update_thread: Mutex<Option<JoinHandle<()>>>,
}

impl FairScheduler {
    /// Build the scheduler and its queue tree from `config`.
    ///
    /// # Arguments
    /// * `config` - Scheduler settings, including the queue tree
    /// * `metrics` - Sink receiving per-queue gauges and counters
    pub fn new(config: SchedulerConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let context = Arc::new(SchedulerContext::new(metrics));
        let queues = QueueManager::new(context.clone(), &config.queues)?;
        info!(queues = queues.queue_names().len(), "Fair scheduler initialised");
        Ok(Self {
            context,
            config: RwLock::new(config),
            queues,
            nodes: RwLock::new(HashMap::new()),
            apps: RwLock::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
            update_thread: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.context
    }

    pub fn queue_manager(&self) -> &QueueManager {
        &self.queues
    }

    pub fn cluster_resource(&self) -> Resource {
        self.context.cluster_resource()
    }

    /// Register a node and grow the cluster by its capacity.
    pub fn add_node(&self, id: impl Into<String>, total: Resource) -> Arc<SchedulerNode> {
        let node = Arc::new(SchedulerNode::new(id, total));
        self.nodes
            .write()
            .insert(node.id().to_string(), node.clone());
        info!(node = %node.id(), capacity = %total, "Node added");
        self.refresh_cluster_resource();
        node
    }

    /// Unregister a node; containers running on it are dropped from their applications.
    pub fn remove_node(&self, id: &str) -> Option<Arc<SchedulerNode>> {
        let node = self.nodes.write().remove(id)?;
        for app in self.apps.read().values() {
            for container in app.live_containers() {
                if container.node_id == id {
                    app.release_container(container.id);
                }
            }
        }
        info!(node = %id, "Node removed");
        self.refresh_cluster_resource();
        Some(node)
    }

    pub fn node(&self, id: &str) -> Option<Arc<SchedulerNode>> {
        self.nodes.read().get(id).cloned()
    }

    fn refresh_cluster_resource(&self) {
        let total = self
            .nodes
            .read()
            .values()
            .fold(Resource::none(), |sum, node| sum + node.total());
        self.context.set_cluster_resource(total);
        self.update_steady_shares();
    }

    fn update_steady_shares(&self) {
        let root = self.queues.root();
        root.set_steady_fair_share(self.context.cluster_resource());
        root.recompute_steady_shares();
    }

    /// Submit an application attempt to `queue`, creating the leaf on demand.
    ///
    /// # Returns
    /// The new attempt, or `AccessDenied` when `user` lacks the submit ACL.
    pub fn submit_app(
        &self,
        app_id: impl Into<String>,
        queue: &str,
        user: &str,
        priority: u32,
    ) -> Result<Arc<AppAttempt>> {
        let app_id = app_id.into();
        let leaf = self.queues.get_leaf_queue(queue, true)?;
        if !leaf.has_access(QueueAcl::SubmitApplications, user) {
            warn!(app = %app_id, user = %user, queue = %leaf.name(), "Submission rejected by ACL");
            return Err(Error::AccessDenied {
                user: user.to_string(),
                queue: leaf.name().to_string(),
            });
        }
        let app = Arc::new(AppAttempt::new(
            app_id.clone(),
            user,
            leaf.name(),
            priority,
            self.context.clone(),
        ));
        let runnable = leaf.add_app(app.clone());
        self.apps.write().insert(app_id.clone(), app.clone());
        info!(app = %app_id, queue = %leaf.name(), user = %user, runnable, "Application submitted");
        Ok(app)
    }

    /// Remove an attempt and give its containers back to their nodes.
    pub fn remove_app(&self, app_id: &str) -> Result<()> {
        let app = self
            .apps
            .write()
            .remove(app_id)
            .ok_or_else(|| Error::AppNotFound {
                app: app_id.to_string(),
            })?;
        if let Ok(leaf) = self.queues.get_leaf_queue(app.queue_name(), false) {
            leaf.remove_app(app_id);
        }
        let nodes = self.nodes.read();
        for container in app.release_all() {
            if let Some(node) = nodes.get(&container.node_id) {
                node.release(container.resource);
            }
        }
        info!(app = %app_id, queue = %app.queue_name(), "Application removed");
        Ok(())
    }

    pub fn app(&self, app_id: &str) -> Option<Arc<AppAttempt>> {
        self.apps.read().get(app_id).cloned()
    }

    /// Heartbeat from `node_id`: hand its free capacity to the queue tree.
    ///
    /// One container per heartbeat unless `assign_multiple` is set, in which case assignment
    /// continues until nothing fits or `max_assign` containers were placed.
    ///
    /// # Returns
    /// Total resource assigned during this heartbeat.
    pub fn node_update(&self, node_id: &str) -> Resource {
        let Some(node) = self.node(node_id) else {
            warn!(node = %node_id, "Heartbeat from unknown node");
            return Resource::none();
        };
        let (assign_multiple, max_assign) = {
            let config = self.config.read();
            (config.assign_multiple, config.max_assign)
        };
        let root = self.queues.root();
        let mut total = Resource::none();
        let mut assigned = 0usize;
        loop {
            let resource = root.assign_container(&node);
            if resource.is_none() {
                break;
            }
            total += resource;
            assigned += 1;
            if !assign_multiple || max_assign.is_some_and(|max| assigned >= max) {
                break;
            }
        }
        if assigned > 0 {
            debug!(node = %node_id, containers = assigned, resource = %total, "Heartbeat assigned");
        }
        total
    }

    /// Refresh demand bottom-up, then fair shares top-down from the cluster capacity.
    pub fn update(&self) {
        let root = self.queues.root();
        root.update_demand();
        root.set_fair_share(self.context.cluster_resource());
        root.recompute_shares();
        root.base().publish_shares();

        let metrics = self.context.metrics();
        let cluster = self.context.cluster_resource();
        metrics.gauge("cluster", "memory_mb", cluster.memory_mb as f64);
        metrics.gauge("cluster", "vcores", cluster.vcores as f64);
        metrics.gauge("cluster", "apps", self.apps.read().len() as f64);
    }

    /// Pick the next container to reclaim for a starved queue.
    ///
    /// The container stays allocated until [`FairScheduler::release_container`] is called.
    pub fn preempt_container(&self) -> Option<Container> {
        let container = self.queues.root().preempt_container()?;
        info!(container = container.id, app = %container.app_id, queue = %container.queue, "Container selected for preemption");
        self.context
            .metrics()
            .increment(&container.queue, "preemptions", 1);
        Some(container)
    }

    /// Complete or reclaim a container, returning its capacity to the node.
    pub fn release_container(&self, app_id: &str, container_id: u64) -> Result<Option<Container>> {
        let app = self.app(app_id).ok_or_else(|| Error::AppNotFound {
            app: app_id.to_string(),
        })?;
        let released = app.release_container(container_id);
        if let Some(container) = &released {
            if let Some(node) = self.node(&container.node_id) {
                node.release(container.resource);
            }
            debug!(app = %app_id, container = container_id, "Container released");
        }
        Ok(released)
    }

    /// ACLs `user` holds on every queue, pre-order from the root.
    pub fn queue_user_acl_info(&self, user: &str) -> Vec<QueueUserAclInfo> {
        self.queues.root().queue_user_acl_info(user)
    }

    /// Apply a new configuration; the old one stays in force when validation fails.
    pub fn reload(&self, config: SchedulerConfig) -> Result<()> {
        self.queues.reload(&config.queues)?;
        *self.config.write() = config;
        self.update_steady_shares();
        Ok(())
    }

    /// Start the periodic update thread.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let scheduler: Weak<Self> = Arc::downgrade(self);
        let running = self.running.clone();
        let interval = self.config.read().update_interval();
        let handle = std::thread::Builder::new()
            .name("FairSchedulerUpdateThread".to_string())
            .spawn(move || {
                let mut last = Instant::now();
                while running.load(Ordering::Relaxed) {
                    if last.elapsed() >= interval {
                        match scheduler.upgrade() {
                            Some(scheduler) => scheduler.update(),
                            None => break,
                        }
                        last = Instant::now();
                    }
                    std::thread::sleep(UPDATE_THREAD_TICK.min(interval));
                }
            })?;
        *self.update_thread.lock() = Some(handle);
        info!(interval_ms = interval.as_millis() as u64, "Update thread started");
        Ok(())
    }

    /// Stop the update thread and wait for it to exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.update_thread.lock().take() {
            let _ = handle.join();
            info!("Update thread stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Drop for FairScheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
