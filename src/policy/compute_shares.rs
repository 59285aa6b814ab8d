//! Water-filling fair share computation.
//!
//! Given a set of siblings with weights, min shares and caps, find the weight-to-resource ratio
//! `R` such that `sum(clamp(R * weight, min_share, cap)) == total`, where the cap is the
//! sibling's max share (steady share) or `min(demand, max share)` (instantaneous share). Each
//! resource dimension is solved independently. `R` is bracketed by doubling, then narrowed with
//! a fixed number of bisection steps.

use super::ShareInput;
use crate::resource::{Resource, ResourceType};

/// Bisection steps; enough to converge well below one unit for any realistic cluster size.
const COMPUTE_FAIR_SHARES_ITERATIONS: usize = 25;

/// Upper bound on the doubling phase. 2^64 overshoots any u64 total.
const MAX_DOUBLINGS: usize = 64;

/// Compute instantaneous or steady shares for `inputs` out of `total`.
///
/// Inactive inputs get a zero share. Inputs with a non-positive weight get their min share
/// (clamped to their cap) and are removed from the pool before solving for `R`.
pub fn compute_shares(inputs: &[ShareInput], total: Resource, steady: bool) -> Vec<Resource> {
    let mut shares = vec![Resource::none(); inputs.len()];
    for kind in ResourceType::ALL {
        for (slot, value) in shares
            .iter_mut()
            .zip(compute_dimension(inputs, total.get(kind), kind, steady))
        {
            slot.set(kind, value);
        }
    }
    shares
}

fn cap(input: &ShareInput, kind: ResourceType, steady: bool) -> f64 {
    let max = input.max_share.get(kind);
    if steady {
        max as f64
    } else {
        max.min(input.demand.get(kind)) as f64
    }
}

fn share_at(input: &ShareInput, ratio: f64, kind: ResourceType, steady: bool) -> f64 {
    let share = (ratio * input.weight).max(input.min_share.get(kind) as f64);
    share.min(cap(input, kind, steady))
}

fn compute_dimension(inputs: &[ShareInput], total: u64, kind: ResourceType, steady: bool) -> Vec<u64> {
    let mut result = vec![0u64; inputs.len()];
    let mut taken = 0.0f64;
    let mut variable = Vec::with_capacity(inputs.len());

    for (index, input) in inputs.iter().enumerate() {
        if !steady && !input.active {
            continue;
        }
        if input.weight <= 0.0 {
            let fixed = (input.min_share.get(kind) as f64).min(cap(input, kind, steady));
            result[index] = fixed as u64;
            taken += fixed;
        } else {
            variable.push(index);
        }
    }

    if variable.is_empty() {
        return result;
    }

    let cap_sum: f64 = variable
        .iter()
        .map(|&index| cap(&inputs[index], kind, steady))
        .sum();
    let target = (total as f64 - taken).max(0.0).min(cap_sum);

    let used_at = |ratio: f64| -> f64 {
        variable
            .iter()
            .map(|&index| share_at(&inputs[index], ratio, kind, steady))
            .sum()
    };

    let mut right = 1.0f64;
    let mut doublings = 0;
    while used_at(right) < target && doublings < MAX_DOUBLINGS {
        right *= 2.0;
        doublings += 1;
    }

    let mut left = 0.0f64;
    for _ in 0..COMPUTE_FAIR_SHARES_ITERATIONS {
        let mid = (left + right) / 2.0;
        if used_at(mid) < target {
            left = mid;
        } else {
            right = mid;
        }
    }

    for &index in &variable {
        result[index] = share_at(&inputs[index], right, kind, steady) as u64;
    }
    result
}
