//! Pluggable scheduling policies.
//!
//! A policy decides three things for the children of one queue:
//! - the order in which they are offered resources ([`SchedulingPolicy::compare`]),
//! - how the queue's own share is split between them ([`SchedulingPolicy::compute_shares`]),
//! - whether a child counts as over its fair share for preemption.
//!
//! Policies declare the tree depths they can be used at; queues reject an inapplicable policy
//! when it is set, never at scheduling time.

pub mod compute_shares;
pub mod drf;
pub mod fair;
pub mod fifo;

use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::schedulable::Schedulable;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub use drf::DominantResourceFairnessPolicy;
pub use fair::FairSharePolicy;
pub use fifo::FifoPolicy;

/// Set of tree depths a policy may be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Depth(u8);

impl Depth {
    pub const LEAF: Depth = Depth(0b001);
    pub const INTERMEDIATE: Depth = Depth(0b010);
    pub const ROOT: Depth = Depth(0b100);
    pub const PARENT: Depth = Depth(0b110);
    pub const ANY: Depth = Depth(0b111);

    /// `true` if every depth in `other` is also in `self`.
    pub const fn contains(self, other: Depth) -> bool {
        self.0 & other.0 == other.0
    }
}

/// The per-child numbers a share computation needs.
#[derive(Debug, Clone, Copy)]
pub struct ShareInput {
    pub serial: u64,
    pub weight: f64,
    pub min_share: Resource,
    pub max_share: Resource,
    pub demand: Resource,
    /// Children without runnable work get no instantaneous share.
    pub active: bool,
}

impl ShareInput {
    pub fn from_schedulable<S: Schedulable + ?Sized>(schedulable: &S, active: bool) -> Self {
        Self {
            serial: schedulable.serial(),
            weight: schedulable.weight(),
            min_share: schedulable.min_share(),
            max_share: schedulable.max_share(),
            demand: schedulable.demand(),
            active,
        }
    }
}

/// Behaviour shared by every scheduling policy.
pub trait SchedulingPolicy: Send + Sync + fmt::Debug {
    /// Name used in configuration and error messages.
    fn name(&self) -> &'static str;

    fn applicable_depth(&self) -> Depth;

    fn is_applicable_to(&self, depth: Depth) -> bool {
        self.applicable_depth().contains(depth)
    }

    /// Order two siblings; `Less` means `a` should be offered resources first.
    ///
    /// Implementations end with the serial tie-break, so the result is a total order.
    fn compare(&self, a: &dyn Schedulable, b: &dyn Schedulable, cluster: &Resource) -> Ordering;

    /// Split `total` between `inputs`; the result is index-aligned with `inputs`.
    fn compute_shares(&self, inputs: &[ShareInput], total: Resource) -> Vec<Resource> {
        compute_shares::compute_shares(inputs, total, false)
    }

    /// Like [`SchedulingPolicy::compute_shares`] but ignoring demand and activity.
    fn compute_steady_shares(&self, inputs: &[ShareInput], total: Resource) -> Vec<Resource> {
        compute_shares::compute_shares(inputs, total, true)
    }

    /// Whether `usage` exceeds `fair_share` in the sense this policy cares about.
    fn is_usage_over_fair_share(&self, usage: &Resource, fair_share: &Resource) -> bool {
        usage.memory_mb > fair_share.memory_mb
    }
}

/// Policy identifiers accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    #[default]
    Fair,
    Fifo,
    Drf,
}

impl PolicyKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fair" => Ok(PolicyKind::Fair),
            "fifo" => Ok(PolicyKind::Fifo),
            "drf" => Ok(PolicyKind::Drf),
            _ => Err(Error::UnknownPolicy {
                name: name.to_string(),
            }),
        }
    }

    pub fn build(self) -> Arc<dyn SchedulingPolicy> {
        match self {
            PolicyKind::Fair => Arc::new(FairSharePolicy),
            PolicyKind::Fifo => Arc::new(FifoPolicy),
            PolicyKind::Drf => Arc::new(DominantResourceFairnessPolicy),
        }
    }
}

/// Final tie-break shared by every comparator.
pub(crate) fn by_serial(a: &dyn Schedulable, b: &dyn Schedulable) -> Ordering {
    a.serial().cmp(&b.serial())
}

/// Total order on f64 ratios; NaN sorts last.
pub(crate) fn cmp_ratio(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}
