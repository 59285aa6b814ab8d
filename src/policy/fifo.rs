//! First-in-first-out ordering for the applications of one leaf queue.

use super::{by_serial, Depth, SchedulingPolicy, ShareInput};
use crate::resource::Resource;
use crate::schedulable::Schedulable;
use std::cmp::Ordering;

/// FIFO policy: higher priority first, then earliest submission. Leaf queues only.
///
/// The whole share goes to the earliest submitted entity.
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoPolicy;

impl SchedulingPolicy for FifoPolicy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn applicable_depth(&self) -> Depth {
        Depth::LEAF
    }

    fn compare(&self, a: &dyn Schedulable, b: &dyn Schedulable, _cluster: &Resource) -> Ordering {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| by_serial(a, b))
    }

    fn compute_shares(&self, inputs: &[ShareInput], total: Resource) -> Vec<Resource> {
        let earliest = inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| input.active)
            .min_by_key(|(_, input)| input.serial)
            .map(|(index, _)| index);
        inputs
            .iter()
            .enumerate()
            .map(|(index, _)| {
                if Some(index) == earliest {
                    total
                } else {
                    Resource::none()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedulable::SchedulableSnapshot as Snapshot;

    #[test]
    fn test_priority_then_serial() {
        let early = Snapshot::with_usage("early", 1, Resource::none());
        let mut urgent = Snapshot::with_usage("urgent", 9, Resource::none());
        urgent.priority = 5;

        assert_eq!(FifoPolicy.compare(&urgent, &early, &Resource::none()), Ordering::Less);

        let late = Snapshot::with_usage("late", 2, Resource::none());
        assert_eq!(FifoPolicy.compare(&early, &late, &Resource::none()), Ordering::Less);
    }

    #[test]
    fn test_earliest_active_takes_everything() {
        let input = |serial, active| ShareInput {
            serial,
            weight: 1.0,
            min_share: Resource::none(),
            max_share: Resource::unbounded(),
            demand: Resource::new(10, 1),
            active,
        };
        let shares = FifoPolicy.compute_shares(
            &[input(3, true), input(1, false), input(2, true)],
            Resource::new(100, 4),
        );
        assert_eq!(shares, vec![Resource::none(), Resource::none(), Resource::new(100, 4)]);
    }
}
