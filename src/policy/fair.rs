//! Max-min fairness on memory, with min shares served first.

use super::{by_serial, cmp_ratio, Depth, SchedulingPolicy};
use crate::resource::Resource;
use crate::schedulable::Schedulable;
use std::cmp::Ordering;

/// Fair-share policy.
///
/// Ordering:
/// 1. Children below their min share, capped by demand ("needy"), come before those that are not.
/// 2. Two needy children compare by usage / min share.
/// 3. Otherwise compare by usage / weight.
/// 4. Ties fall back to the submission serial.
#[derive(Debug, Default, Clone, Copy)]
pub struct FairSharePolicy;

impl SchedulingPolicy for FairSharePolicy {
    fn name(&self) -> &'static str {
        "fair"
    }

    fn applicable_depth(&self) -> Depth {
        Depth::ANY
    }

    fn compare(&self, a: &dyn Schedulable, b: &dyn Schedulable, _cluster: &Resource) -> Ordering {
        let usage_a = a.resource_usage().memory_mb as f64;
        let usage_b = b.resource_usage().memory_mb as f64;
        let min_a = a.min_share().memory_mb.min(a.demand().memory_mb) as f64;
        let min_b = b.min_share().memory_mb.min(b.demand().memory_mb) as f64;
        let needy_a = usage_a < min_a;
        let needy_b = usage_b < min_b;

        let primary = match (needy_a, needy_b) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => cmp_ratio(usage_a / min_a.max(1.0), usage_b / min_b.max(1.0)),
            (false, false) => cmp_ratio(
                usage_a / weight_or_one(a.weight()),
                usage_b / weight_or_one(b.weight()),
            ),
        };
        primary.then_with(|| by_serial(a, b))
    }
}

fn weight_or_one(weight: f64) -> f64 {
    if weight > 0.0 {
        weight
    } else {
        1.0
    }
}
