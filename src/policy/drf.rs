//! Dominant resource fairness.

use super::{by_serial, cmp_ratio, Depth, SchedulingPolicy};
use crate::resource::Resource;
use crate::schedulable::Schedulable;
use std::cmp::Ordering;

/// Orders children by their dominant share of the cluster, divided by weight.
///
/// A child is needy while any dimension of its usage is under its min share capped by its
/// demand; needy children go first and compare by dominant share of that capped min share.
#[derive(Debug, Default, Clone, Copy)]
pub struct DominantResourceFairnessPolicy;

impl SchedulingPolicy for DominantResourceFairnessPolicy {
    fn name(&self) -> &'static str {
        "drf"
    }

    fn applicable_depth(&self) -> Depth {
        Depth::ANY
    }

    fn compare(&self, a: &dyn Schedulable, b: &dyn Schedulable, cluster: &Resource) -> Ordering {
        let usage_a = a.resource_usage();
        let usage_b = b.resource_usage();
        let min_a = a.min_share().componentwise_min(a.demand());
        let min_b = b.min_share().componentwise_min(b.demand());
        let needy_a = !min_a.fits_in(&usage_a);
        let needy_b = !min_b.fits_in(&usage_b);

        let primary = match (needy_a, needy_b) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => cmp_ratio(usage_a.dominant_share(&min_a), usage_b.dominant_share(&min_b)),
            (false, false) => cmp_ratio(
                weighted(usage_a.dominant_share(cluster), a.weight()),
                weighted(usage_b.dominant_share(cluster), b.weight()),
            ),
        };
        primary.then_with(|| by_serial(a, b))
    }

    fn is_usage_over_fair_share(&self, usage: &Resource, fair_share: &Resource) -> bool {
        !usage.fits_in(fair_share)
    }
}

fn weighted(share: f64, weight: f64) -> f64 {
    if weight > 0.0 {
        share / weight
    } else {
        share
    }
}
