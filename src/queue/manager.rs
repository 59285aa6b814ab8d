//! Builds the queue tree from configuration and resolves queues by name.
//!
//! Names are dotted full paths starting at `root`. A name without the `root.` prefix is taken
//! relative to the root. Queues requested for submission may be created on demand, including
//! any missing intermediate parents.

use super::{FsQueue, LeafQueue, ParentQueue, QueueSettings, ROOT_QUEUE};
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::policy::{Depth, PolicyKind, SchedulingPolicy};
use crate::schedulable::SchedulerContext;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// A queue of either kind, as stored in the name index.
#[derive(Clone)]
pub enum QueueNode {
    Parent(Arc<ParentQueue>),
    Leaf(Arc<LeafQueue>),
}

impl QueueNode {
    pub fn as_queue(&self) -> Arc<dyn FsQueue> {
        match self {
            QueueNode::Parent(queue) => queue.clone(),
            QueueNode::Leaf(queue) => queue.clone(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            QueueNode::Parent(_) => "parent",
            QueueNode::Leaf(_) => "leaf",
        }
    }
}

/// A queue entry flattened out of a [`QueueConfig`] tree.
struct Planned<'a> {
    name: String,
    parent: String,
    config: &'a QueueConfig,
    policy: Arc<dyn SchedulingPolicy>,
}

/// Owns the queue tree and the full-name index over it.
pub struct QueueManager {
    context: Arc<SchedulerContext>,
    root: Arc<ParentQueue>,
    queues: RwLock<BTreeMap<String, QueueNode>>,
}

impl QueueManager {
    /// Build the tree described by `config`, whose top-level entry must be `root`.
    pub fn new(context: Arc<SchedulerContext>, config: &QueueConfig) -> Result<Self> {
        let planned = plan(config)?;
        let root = ParentQueue::new(
            ROOT_QUEUE,
            None,
            QueueSettings::from_config(config, true),
            policy_for(config)?,
            context.clone(),
        )?;
        let manager = Self {
            context,
            root: root.clone(),
            queues: RwLock::new(BTreeMap::new()),
        };
        {
            let mut queues = manager.queues.write();
            queues.insert(ROOT_QUEUE.to_string(), QueueNode::Parent(root));
            for entry in &planned {
                manager.create_planned(&mut queues, entry)?;
            }
        }
        Ok(manager)
    }

    pub fn root(&self) -> Arc<ParentQueue> {
        self.root.clone()
    }

    pub fn get_queue(&self, name: &str) -> Option<Arc<dyn FsQueue>> {
        let name = normalize(name).ok()?;
        self.queues.read().get(&name).map(QueueNode::as_queue)
    }

    /// Look up a leaf queue, creating it (and missing parents) when `create` is set.
    pub fn get_leaf_queue(&self, name: &str, create: bool) -> Result<Arc<LeafQueue>> {
        match self.resolve(name, create, true)? {
            QueueNode::Leaf(leaf) => Ok(leaf),
            QueueNode::Parent(_) => Err(Error::WrongQueueType {
                name: normalize(name)?,
                expected: "leaf",
            }),
        }
    }

    /// Look up a parent queue, creating it (and missing ancestors) when `create` is set.
    pub fn get_parent_queue(&self, name: &str, create: bool) -> Result<Arc<ParentQueue>> {
        match self.resolve(name, create, false)? {
            QueueNode::Parent(parent) => Ok(parent),
            QueueNode::Leaf(_) => Err(Error::WrongQueueType {
                name: normalize(name)?,
                expected: "parent",
            }),
        }
    }

    pub fn leaf_queues(&self) -> Vec<Arc<LeafQueue>> {
        self.queues
            .read()
            .values()
            .filter_map(|node| match node {
                QueueNode::Leaf(leaf) => Some(leaf.clone()),
                QueueNode::Parent(_) => None,
            })
            .collect()
    }

    /// Full names of every queue, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.read().keys().cloned().collect()
    }

    fn resolve(&self, name: &str, create: bool, want_leaf: bool) -> Result<QueueNode> {
        let full = normalize(name)?;
        if let Some(node) = self.queues.read().get(&full) {
            return Ok(node.clone());
        }
        if !create {
            return Err(Error::QueueNotFound { name: full });
        }

        let mut queues = self.queues.write();
        let components: Vec<&str> = full.split('.').collect();
        let mut parent = self.root.clone();
        let mut path = ROOT_QUEUE.to_string();
        for (index, component) in components.iter().enumerate().skip(1) {
            path = format!("{path}.{component}");
            let last = index == components.len() - 1;
            let leaf_here = last && want_leaf;
            match queues.get(&path) {
                Some(QueueNode::Parent(existing)) if !leaf_here => parent = existing.clone(),
                Some(QueueNode::Leaf(existing)) if leaf_here => {
                    return Ok(QueueNode::Leaf(existing.clone()))
                }
                Some(_) => {
                    return Err(Error::WrongQueueType {
                        name: path,
                        expected: if leaf_here { "leaf" } else { "parent" },
                    })
                }
                None if leaf_here => {
                    let leaf = LeafQueue::new(
                        path.clone(),
                        &parent,
                        QueueSettings::dynamic(false),
                        PolicyKind::default().build(),
                        self.context.clone(),
                    )?;
                    parent.add_child(leaf.clone());
                    queues.insert(path.clone(), QueueNode::Leaf(leaf.clone()));
                    info!(queue = %path, kind = "leaf", "Queue created on demand");
                    return Ok(QueueNode::Leaf(leaf));
                }
                None => {
                    let created = ParentQueue::new(
                        path.clone(),
                        Some(&parent),
                        QueueSettings::dynamic(false),
                        PolicyKind::default().build(),
                        self.context.clone(),
                    )?;
                    parent.add_child(created.clone());
                    queues.insert(path.clone(), QueueNode::Parent(created.clone()));
                    info!(queue = %path, kind = "parent", "Queue created on demand");
                    parent = created;
                }
            }
        }
        Ok(QueueNode::Parent(parent))
    }

    fn create_planned(
        &self,
        queues: &mut BTreeMap<String, QueueNode>,
        entry: &Planned<'_>,
    ) -> Result<QueueNode> {
        let parent = match queues.get(&entry.parent) {
            Some(QueueNode::Parent(parent)) => parent.clone(),
            Some(QueueNode::Leaf(_)) => {
                return Err(Error::WrongQueueType {
                    name: entry.parent.clone(),
                    expected: "parent",
                })
            }
            None => {
                return Err(Error::QueueNotFound {
                    name: entry.parent.clone(),
                })
            }
        };
        let settings = QueueSettings::from_config(entry.config, false);
        let node = if entry.config.is_parent() {
            let queue = ParentQueue::new(
                entry.name.clone(),
                Some(&parent),
                settings,
                entry.policy.clone(),
                self.context.clone(),
            )?;
            parent.add_child(queue.clone());
            QueueNode::Parent(queue)
        } else {
            let queue = LeafQueue::new(
                entry.name.clone(),
                &parent,
                settings,
                entry.policy.clone(),
                self.context.clone(),
            )?;
            parent.add_child(queue.clone());
            QueueNode::Leaf(queue)
        };
        info!(queue = %entry.name, kind = node.kind(), "Queue created");
        queues.insert(entry.name.clone(), node.clone());
        Ok(node)
    }

    /// Apply a new configuration.
    ///
    /// Every name, policy and parent/leaf placement is checked against the current tree before
    /// anything changes; on error the tree is left as it was. Existing queues take the new
    /// settings and policy; new queues are created. Queues missing from the new configuration
    /// are removed when their subtree holds no applications, otherwise kept until drained and
    /// retried on the next reload.
    pub fn reload(&self, config: &QueueConfig) -> Result<()> {
        let planned = plan(config)?;
        let root_policy = policy_for(config)?;

        let mut queues = self.queues.write();
        let steps = resolve_reload(&queues, &planned)?;

        self.root
            .base()
            .update_settings(QueueSettings::from_config(config, true));
        self.root.set_policy(root_policy)?;

        let mut wanted: HashSet<&str> = HashSet::new();
        wanted.insert(ROOT_QUEUE);
        for (entry, step) in planned.iter().zip(steps) {
            wanted.insert(entry.name.as_str());
            match step {
                ReloadStep::Update(node) => {
                    let queue = node.as_queue();
                    queue
                        .base()
                        .update_settings(QueueSettings::from_config(entry.config, false));
                    queue.set_policy(entry.policy.clone())?;
                    if let QueueNode::Leaf(leaf) = node {
                        leaf.promote_runnable();
                    }
                }
                ReloadStep::Replace => {
                    self.detach(&mut queues, &entry.name);
                    self.create_planned(&mut queues, entry)?;
                }
                ReloadStep::Keep(node) => {
                    warn!(queue = %entry.name, current = node.kind(), "Queue kind changed in configuration but queue has applications; keeping it");
                }
                ReloadStep::Create => {
                    self.create_planned(&mut queues, entry)?;
                }
            }
        }

        // Deepest first, so a vanished parent is only removed after its children.
        let mut stale: Vec<String> = queues
            .keys()
            .filter(|name| !wanted.contains(name.as_str()))
            .cloned()
            .collect();
        stale.sort_by_key(|name| std::cmp::Reverse(name.matches('.').count()));
        for name in stale {
            let Some(node) = queues.get(&name).cloned() else {
                continue;
            };
            if subtree_is_empty(&node) {
                self.detach(&mut queues, &name);
                info!(queue = %name, "Queue removed");
            } else {
                warn!(queue = %name, "Queue removed from configuration still has applications; keeping it");
            }
        }

        info!(queues = queues.len(), "Queue configuration reloaded");
        Ok(())
    }

    /// Unlink `name` and everything below it.
    fn detach(&self, queues: &mut BTreeMap<String, QueueNode>, name: &str) {
        if let Some(node) = queues.get(name) {
            if let Some(parent) = node.as_queue().parent() {
                parent.remove_child(name);
            }
        }
        let prefix = format!("{name}.");
        queues.retain(|key, _| key != name && !key.starts_with(&prefix));
    }
}

/// What a reload does with one planned entry.
enum ReloadStep {
    /// Same kind already present: new settings and policy.
    Update(QueueNode),
    /// Other kind present with no applications below it: rebuilt.
    Replace,
    /// Other kind present with applications below it: left alone.
    Keep(QueueNode),
    Create,
}

/// Decide every step of a reload against the current index without touching it.
///
/// Replacements and creations are replayed on a copy of the index's shape, so an entry whose
/// parent would end up missing or a leaf is reported before the real tree changes.
fn resolve_reload(
    queues: &BTreeMap<String, QueueNode>,
    planned: &[Planned<'_>],
) -> Result<Vec<ReloadStep>> {
    let mut shape: BTreeMap<String, bool> = queues
        .iter()
        .map(|(name, node)| (name.clone(), matches!(node, QueueNode::Parent(_))))
        .collect();
    let mut steps = Vec::with_capacity(planned.len());

    for entry in planned {
        let wants_parent = entry.config.is_parent();
        let step = match (shape.get(&entry.name).copied(), queues.get(&entry.name)) {
            (Some(is_parent), Some(node)) if is_parent == wants_parent => {
                ReloadStep::Update(node.clone())
            }
            (Some(_), Some(node)) if !subtree_is_empty(node) => ReloadStep::Keep(node.clone()),
            (Some(_), _) => ReloadStep::Replace,
            (None, _) => ReloadStep::Create,
        };

        if matches!(step, ReloadStep::Replace | ReloadStep::Create) {
            match shape.get(&entry.parent) {
                Some(true) => {}
                Some(false) => {
                    return Err(Error::WrongQueueType {
                        name: entry.parent.clone(),
                        expected: "parent",
                    })
                }
                None => {
                    return Err(Error::QueueNotFound {
                        name: entry.parent.clone(),
                    })
                }
            }
            let prefix = format!("{}.", entry.name);
            shape.retain(|key, _| key != &entry.name && !key.starts_with(&prefix));
            shape.insert(entry.name.clone(), wants_parent);
        }
        steps.push(step);
    }
    Ok(steps)
}

fn subtree_is_empty(node: &QueueNode) -> bool {
    let mut apps = Vec::new();
    node.as_queue().collect_apps(&mut apps);
    apps.is_empty()
}

fn policy_for(config: &QueueConfig) -> Result<Arc<dyn SchedulingPolicy>> {
    match config.policy.as_deref() {
        Some(name) => Ok(PolicyKind::parse(name)?.build()),
        None => Ok(PolicyKind::default().build()),
    }
}

/// Flatten and validate the configured tree in pre-order, without the root.
fn plan(config: &QueueConfig) -> Result<Vec<Planned<'_>>> {
    if config.name != ROOT_QUEUE {
        return Err(Error::InvalidQueueName {
            name: config.name.clone(),
            reason: format!("top-level queue must be '{ROOT_QUEUE}'"),
        });
    }
    check_policy(config, ROOT_QUEUE, Depth::ROOT)?;
    let mut out = Vec::new();
    plan_children(config, ROOT_QUEUE, &mut out)?;
    Ok(out)
}

fn plan_children<'a>(
    config: &'a QueueConfig,
    parent: &str,
    out: &mut Vec<Planned<'a>>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for child in &config.children {
        validate_component(&child.name, parent)?;
        let name = format!("{parent}.{}", child.name);
        if !seen.insert(child.name.as_str()) {
            return Err(Error::InvalidQueueName {
                name,
                reason: "defined twice".to_string(),
            });
        }
        let depth = if child.is_parent() {
            Depth::INTERMEDIATE
        } else {
            Depth::LEAF
        };
        let policy = check_policy(child, &name, depth)?;
        out.push(Planned {
            name: name.clone(),
            parent: parent.to_string(),
            config: child,
            policy,
        });
        plan_children(child, &name, out)?;
    }
    Ok(())
}

fn check_policy(config: &QueueConfig, name: &str, depth: Depth) -> Result<Arc<dyn SchedulingPolicy>> {
    let policy = policy_for(config)?;
    if !policy.is_applicable_to(depth) {
        return Err(Error::PolicyNotApplicable {
            policy: policy.name().to_string(),
            queue: name.to_string(),
        });
    }
    Ok(policy)
}

fn validate_component(component: &str, parent: &str) -> Result<()> {
    let reason = if component.is_empty() {
        Some("empty name component")
    } else if component.contains('.') {
        Some("configured names must not contain '.'")
    } else if component.chars().any(char::is_whitespace) {
        Some("whitespace in name")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::InvalidQueueName {
            name: format!("{parent}.{component}"),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Canonical full name: `root`-prefixed, validated component by component.
pub fn normalize(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let full = if trimmed == ROOT_QUEUE || trimmed.starts_with("root.") {
        trimmed.to_string()
    } else {
        format!("{ROOT_QUEUE}.{trimmed}")
    };
    for component in full.split('.') {
        if component.is_empty() || component.chars().any(char::is_whitespace) {
            return Err(Error::InvalidQueueName {
                name: name.to_string(),
                reason: "empty component or whitespace".to_string(),
            });
        }
    }
    Ok(full)
}
