//! Caller-to-priority-level mapping for the fair call queue.

use crate::config::FairCallQueueConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Decides which priority level a call goes to. Level 0 is served most often.
///
/// Choosing a level does not charge the caller; only [`RpcScheduler::add_call`] does, once per
/// call that a queue actually accepted.
pub trait RpcScheduler: Send + Sync {
    fn priority_level(&self, identity: &str) -> usize;

    /// Account one accepted call to `identity`.
    fn add_call(&self, _identity: &str) {}

    fn levels(&self) -> usize;
}

/// Puts every call on level 0.
#[derive(Debug, Clone, Copy)]
pub struct DefaultRpcScheduler {
    levels: usize,
}

impl DefaultRpcScheduler {
    pub fn new(levels: usize) -> Self {
        Self { levels }
    }
}

impl RpcScheduler for DefaultRpcScheduler {
    fn priority_level(&self, _identity: &str) -> usize {
        0
    }

    fn levels(&self) -> usize {
        self.levels
    }
}

/// Counts below this after a decay are forgotten.
const FORGET_BELOW: f64 = 0.5;

#[derive(Debug)]
struct DecayState {
    counts: HashMap<String, f64>,
    total: f64,
    last_decay: Instant,
}

/// Ranks callers by their share of recent calls.
///
/// Every accepted call bumps its caller's count; every `decay_period` all counts are multiplied by
/// `decay_factor`. A caller whose share of the total meets `thresholds[i]` lands on level
/// `i + 1` or lower priority, so heavy callers are served less often.
#[derive(Debug)]
pub struct DecayRpcScheduler {
    levels: usize,
    /// Ascending, `levels - 1` entries.
    thresholds: Vec<f64>,
    decay_factor: f64,
    decay_period: Duration,
    state: Mutex<DecayState>,
}

impl DecayRpcScheduler {
    pub fn new(
        levels: usize,
        thresholds: Vec<f64>,
        decay_factor: f64,
        decay_period: Duration,
    ) -> Result<Self> {
        let invalid = |reason: String| Error::QueueConstruction {
            kind: "fair".to_string(),
            reason,
        };
        if levels == 0 {
            return Err(invalid("at least one priority level is required".to_string()));
        }
        if thresholds.len() != levels - 1 {
            return Err(invalid(format!(
                "expected {} thresholds for {levels} levels, got {}",
                levels - 1,
                thresholds.len()
            )));
        }
        if thresholds.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(invalid("thresholds must be ascending".to_string()));
        }
        if !(decay_factor > 0.0 && decay_factor < 1.0) {
            return Err(invalid(format!("decay factor {decay_factor} outside (0, 1)")));
        }
        Ok(Self {
            levels,
            thresholds,
            decay_factor,
            decay_period,
            state: Mutex::new(DecayState {
                counts: HashMap::new(),
                total: 0.0,
                last_decay: Instant::now(),
            }),
        })
    }

    pub fn from_config(config: &FairCallQueueConfig) -> Result<Self> {
        Self::new(
            config.levels,
            config.resolved_thresholds(),
            config.decay_factor,
            config.decay_period(),
        )
    }

    /// Current decayed count for `identity`.
    pub fn call_count(&self, identity: &str) -> f64 {
        self.state.lock().counts.get(identity).copied().unwrap_or(0.0)
    }

    /// Apply one decay step now, regardless of the period.
    pub fn force_decay(&self) {
        let mut state = self.state.lock();
        decay(&mut state, self.decay_factor);
        state.last_decay = Instant::now();
    }

    /// Apply every decay step that came due since the last one, in a single pass.
    fn catch_up(&self, state: &mut DecayState) {
        let period = self.decay_period.as_nanos();
        if period == 0 {
            return;
        }
        let periods = state.last_decay.elapsed().as_nanos() / period;
        if periods == 0 {
            return;
        }
        let factor = i32::try_from(periods).map_or(0.0, |k| self.decay_factor.powi(k));
        decay(state, factor);
        let advanced = u32::try_from(periods)
            .ok()
            .and_then(|k| self.decay_period.checked_mul(k))
            .and_then(|step| state.last_decay.checked_add(step));
        state.last_decay = advanced.unwrap_or_else(Instant::now);
    }

    fn level_for_share(&self, share: f64) -> usize {
        self.thresholds
            .iter()
            .rposition(|threshold| share >= *threshold)
            .map_or(0, |index| index + 1)
    }
}

fn decay(state: &mut DecayState, factor: f64) {
    if factor == 0.0 {
        state.counts.clear();
    } else {
        state.counts.retain(|_, count| {
            *count *= factor;
            *count >= FORGET_BELOW
        });
    }
    state.total = state.counts.values().sum();
}

impl RpcScheduler for DecayRpcScheduler {
    /// Level from the caller's share of the decayed total; unknown callers get level 0.
    fn priority_level(&self, identity: &str) -> usize {
        let mut state = self.state.lock();
        self.catch_up(&mut state);
        let count = state.counts.get(identity).copied().unwrap_or(0.0);
        if state.total <= 0.0 {
            return 0;
        }
        self.level_for_share(count / state.total)
    }

    fn add_call(&self, identity: &str) {
        let mut state = self.state.lock();
        self.catch_up(&mut state);
        *state.counts.entry(identity.to_string()).or_insert(0.0) += 1.0;
        state.total += 1.0;
    }

    fn levels(&self) -> usize {
        self.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pretend the last decay happened `by` earlier than it did.
    fn rewind(scheduler: &DecayRpcScheduler, by: Duration) {
        let mut state = scheduler.state.lock();
        state.last_decay = state.last_decay.checked_sub(by).unwrap();
    }

    fn scheduler() -> DecayRpcScheduler {
        DecayRpcScheduler::new(4, vec![0.125, 0.25, 0.5], 0.5, Duration::from_secs(3600)).unwrap()
    }

    #[test]
    fn test_heavy_caller_drops_to_lower_priority() {
        let scheduler = scheduler();
        for i in 0..8 {
            scheduler.add_call(&format!("light-{i}"));
        }
        assert_eq!(scheduler.priority_level("heavy"), 0);
        for _ in 0..20 {
            scheduler.add_call("heavy");
        }
        assert_eq!(scheduler.priority_level("heavy"), 3);
        assert_eq!(scheduler.priority_level("light-0"), 0);
    }

    #[test]
    fn test_choosing_a_level_does_not_charge() {
        let scheduler = scheduler();
        scheduler.add_call("u");
        for _ in 0..5 {
            scheduler.priority_level("u");
        }
        assert_eq!(scheduler.call_count("u"), 1.0);
    }

    #[test]
    fn test_decay_halves_and_forgets() {
        let scheduler = scheduler();
        scheduler.add_call("a");
        scheduler.add_call("a");
        scheduler.add_call("b");
        scheduler.force_decay();
        assert_eq!(scheduler.call_count("a"), 1.0);
        assert_eq!(scheduler.call_count("b"), 0.5);
        scheduler.force_decay();
        assert_eq!(scheduler.call_count("a"), 0.5);
        assert_eq!(scheduler.call_count("b"), 0.0);
    }

    #[test]
    fn test_long_idle_applies_all_elapsed_periods_at_once() {
        let scheduler =
            DecayRpcScheduler::new(2, vec![0.5], 0.5, Duration::from_millis(1)).unwrap();
        for _ in 0..16 {
            scheduler.add_call("a");
        }
        rewind(&scheduler, Duration::from_secs(10));

        assert_eq!(scheduler.priority_level("a"), 0);
        assert_eq!(scheduler.call_count("a"), 0.0);
        let state = scheduler.state.lock();
        assert_eq!(state.total, 0.0);
        assert!(state.last_decay.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_two_elapsed_periods_decay_twice() {
        let scheduler =
            DecayRpcScheduler::new(2, vec![0.5], 0.5, Duration::from_secs(1)).unwrap();
        for _ in 0..8 {
            scheduler.add_call("a");
        }
        rewind(&scheduler, Duration::from_millis(2500));

        scheduler.priority_level("a");
        assert_eq!(scheduler.call_count("a"), 2.0);
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        assert!(DecayRpcScheduler::new(3, vec![0.5], 0.5, Duration::ZERO).is_err());
        assert!(DecayRpcScheduler::new(3, vec![0.5, 0.25], 0.5, Duration::ZERO).is_err());
        assert!(DecayRpcScheduler::new(2, vec![0.5], 1.5, Duration::ZERO).is_err());
        assert!(DecayRpcScheduler::new(0, vec![], 0.5, Duration::ZERO).is_err());
    }

    #[test]
    fn test_default_scheduler_uses_level_zero() {
        let scheduler = DefaultRpcScheduler::new(4);
        assert_eq!(scheduler.priority_level("anyone"), 0);
        assert_eq!(scheduler.levels(), 4);
    }
}
