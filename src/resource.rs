//! Resource vectors and per-label usage accounting.
//!
//! A [`Resource`] is a two-component vector (memory in MB, virtual cores). All arithmetic is
//! componentwise and saturating so accounting can never underflow when a release races an
//! update. [`ResourceUsage`] keeps used/pending/reserved/AM-used vectors per node label; callers
//! that do not care about labels use [`NO_LABEL`] (`"ANY"`).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Label used when usage is not partitioned by node label.
pub const NO_LABEL: &str = "ANY";

/// Resource dimensions understood by the share computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Memory,
    Vcores,
}

impl ResourceType {
    /// All dimensions in a stable order.
    pub const ALL: [ResourceType; 2] = [ResourceType::Memory, ResourceType::Vcores];
}

/// Componentwise resource vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    pub memory_mb: u64,
    pub vcores: u64,
}

impl Resource {
    pub const fn new(memory_mb: u64, vcores: u64) -> Self {
        Self { memory_mb, vcores }
    }

    /// The zero vector, also used as "no assignment made".
    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    /// Effectively unbounded vector used for unset max shares.
    pub const fn unbounded() -> Self {
        Self::new(u64::MAX, u64::MAX)
    }

    pub fn is_none(&self) -> bool {
        self.memory_mb == 0 && self.vcores == 0
    }

    /// Value of a single dimension.
    pub fn get(&self, kind: ResourceType) -> u64 {
        match kind {
            ResourceType::Memory => self.memory_mb,
            ResourceType::Vcores => self.vcores,
        }
    }

    /// Overwrite a single dimension.
    pub fn set(&mut self, kind: ResourceType, value: u64) {
        match kind {
            ResourceType::Memory => self.memory_mb = value,
            ResourceType::Vcores => self.vcores = value,
        }
    }

    pub fn saturating_add(self, other: Resource) -> Resource {
        Resource::new(
            self.memory_mb.saturating_add(other.memory_mb),
            self.vcores.saturating_add(other.vcores),
        )
    }

    pub fn saturating_sub(self, other: Resource) -> Resource {
        Resource::new(
            self.memory_mb.saturating_sub(other.memory_mb),
            self.vcores.saturating_sub(other.vcores),
        )
    }

    pub fn componentwise_min(self, other: Resource) -> Resource {
        Resource::new(
            self.memory_mb.min(other.memory_mb),
            self.vcores.min(other.vcores),
        )
    }

    pub fn componentwise_max(self, other: Resource) -> Resource {
        Resource::new(
            self.memory_mb.max(other.memory_mb),
            self.vcores.max(other.vcores),
        )
    }

    /// `true` when every component of `self` is `<=` the same component of `other`.
    pub fn fits_in(&self, other: &Resource) -> bool {
        self.memory_mb <= other.memory_mb && self.vcores <= other.vcores
    }

    /// `true` when every component of `self` is `>=` the same component of `other`.
    pub fn covers(&self, other: &Resource) -> bool {
        other.fits_in(self)
    }

    /// Scale both components, rounding down. Saturates on overflow.
    pub fn scale(self, factor: f64) -> Resource {
        fn scale_one(value: u64, factor: f64) -> u64 {
            let scaled = value as f64 * factor;
            if scaled >= u64::MAX as f64 {
                u64::MAX
            } else if scaled <= 0.0 {
                0
            } else {
                scaled as u64
            }
        }
        Resource::new(scale_one(self.memory_mb, factor), scale_one(self.vcores, factor))
    }

    /// Largest per-dimension ratio of `self` to `total`.
    ///
    /// Dimensions where `total` is zero are ignored, so an empty cluster yields `0.0`.
    pub fn dominant_share(&self, total: &Resource) -> f64 {
        ResourceType::ALL
            .iter()
            .filter(|kind| total.get(**kind) > 0)
            .map(|kind| self.get(*kind) as f64 / total.get(*kind) as f64)
            .fold(0.0, f64::max)
    }
}

impl Add for Resource {
    type Output = Resource;

    fn add(self, rhs: Resource) -> Resource {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Resource {
    fn add_assign(&mut self, rhs: Resource) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Resource {
    type Output = Resource;

    fn sub(self, rhs: Resource) -> Resource {
        self.saturating_sub(rhs)
    }
}

impl SubAssign for Resource {
    fn sub_assign(&mut self, rhs: Resource) {
        *self = self.saturating_sub(rhs);
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<memory:{}, vCores:{}>", self.memory_mb, self.vcores)
    }
}

/// Usage vectors tracked for a single node label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageByLabel {
    pub used: Resource,
    pub pending: Resource,
    pub reserved: Resource,
    pub am_used: Resource,
}

/// Kind of usage vector addressed by [`ResourceUsage`] mutators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Used,
    Pending,
    Reserved,
    AmUsed,
}

impl UsageByLabel {
    fn slot(&mut self, kind: UsageKind) -> &mut Resource {
        match kind {
            UsageKind::Used => &mut self.used,
            UsageKind::Pending => &mut self.pending,
            UsageKind::Reserved => &mut self.reserved,
            UsageKind::AmUsed => &mut self.am_used,
        }
    }

    fn value(&self, kind: UsageKind) -> Resource {
        match kind {
            UsageKind::Used => self.used,
            UsageKind::Pending => self.pending,
            UsageKind::Reserved => self.reserved,
            UsageKind::AmUsed => self.am_used,
        }
    }
}

/// Thread-safe per-label resource accounting.
///
/// Reads take a shared lock, mutations an exclusive one. Unknown labels read as zero.
#[derive(Debug, Default)]
pub struct ResourceUsage {
    by_label: RwLock<HashMap<String, UsageByLabel>>,
}

impl ResourceUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one usage vector for `label`.
    pub fn get(&self, kind: UsageKind, label: &str) -> Resource {
        self.by_label
            .read()
            .get(label)
            .map(|usage| usage.value(kind))
            .unwrap_or_default()
    }

    /// Overwrite one usage vector for `label`.
    pub fn set(&self, kind: UsageKind, label: &str, value: Resource) {
        let mut map = self.by_label.write();
        *map.entry(label.to_string()).or_default().slot(kind) = value;
    }

    pub fn increment(&self, kind: UsageKind, label: &str, delta: Resource) {
        let mut map = self.by_label.write();
        *map.entry(label.to_string()).or_default().slot(kind) += delta;
    }

    pub fn decrement(&self, kind: UsageKind, label: &str, delta: Resource) {
        let mut map = self.by_label.write();
        *map.entry(label.to_string()).or_default().slot(kind) -= delta;
    }

    /// Used resources under the default label.
    pub fn used(&self) -> Resource {
        self.get(UsageKind::Used, NO_LABEL)
    }

    /// Pending resources under the default label.
    pub fn pending(&self) -> Resource {
        self.get(UsageKind::Pending, NO_LABEL)
    }

    pub fn inc_used(&self, delta: Resource) {
        self.increment(UsageKind::Used, NO_LABEL, delta);
    }

    pub fn dec_used(&self, delta: Resource) {
        self.decrement(UsageKind::Used, NO_LABEL, delta);
    }

    pub fn inc_pending(&self, delta: Resource) {
        self.increment(UsageKind::Pending, NO_LABEL, delta);
    }

    pub fn dec_pending(&self, delta: Resource) {
        self.decrement(UsageKind::Pending, NO_LABEL, delta);
    }

    /// Copy of every label's usage, for metrics and debugging.
    pub fn snapshot(&self) -> HashMap<String, UsageByLabel> {
        self.by_label.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_saturates() {
        let a = Resource::new(10, 2);
        let b = Resource::new(4, 5);
        assert_eq!(a - b, Resource::new(6, 0));
        assert_eq!(a + b, Resource::new(14, 7));
        assert_eq!(Resource::unbounded() + a, Resource::unbounded());
    }

    #[test]
    fn test_componentwise_min_and_fit() {
        let a = Resource::new(10, 2);
        let b = Resource::new(4, 5);
        assert_eq!(a.componentwise_min(b), Resource::new(4, 2));
        assert!(Resource::new(4, 2).fits_in(&a));
        assert!(!b.fits_in(&a));
    }

    #[test]
    fn test_dominant_share_ignores_empty_dimensions() {
        let total = Resource::new(100, 0);
        assert_eq!(Resource::new(25, 7).dominant_share(&total), 0.25);
        assert_eq!(Resource::new(25, 7).dominant_share(&Resource::none()), 0.0);
    }

    #[test]
    fn test_usage_defaults_to_zero_and_tracks_labels() {
        let usage = ResourceUsage::new();
        assert_eq!(usage.used(), Resource::none());

        usage.inc_used(Resource::new(8, 1));
        usage.increment(UsageKind::Used, "gpu", Resource::new(2, 1));
        usage.dec_used(Resource::new(3, 0));

        assert_eq!(usage.used(), Resource::new(5, 1));
        assert_eq!(usage.get(UsageKind::Used, "gpu"), Resource::new(2, 1));
        assert_eq!(usage.snapshot().len(), 2);
    }
}
