//! Weighted round-robin over priority levels.
//!
//! Same bookkeeping as a deficit round robin: each level has a quantum (its weight) and a
//! remaining credit for the current round. A level keeps being returned until its credit is
//! spent, then the pointer advances and the next level's credit is refilled.

use parking_lot::Mutex;

#[derive(Debug)]
struct RoundState {
    /// Level serviced next.
    current: usize,
    /// Requests the current level may still take this round.
    deficit: usize,
}

#[derive(Debug)]
pub struct WeightedRoundRobinMultiplexer {
    /// Quantum per level; level 0 is the highest priority.
    quanta: Vec<usize>,
    state: Mutex<RoundState>,
}

impl WeightedRoundRobinMultiplexer {
    /// `weights` must be non-empty and every weight positive.
    pub fn new(weights: Vec<usize>) -> Self {
        let first = weights.first().copied().unwrap_or(1);
        Self {
            quanta: weights,
            state: Mutex::new(RoundState {
                current: 0,
                deficit: first,
            }),
        }
    }

    pub fn levels(&self) -> usize {
        self.quanta.len()
    }

    /// Return the level to service and charge one request to it.
    pub fn get_and_advance_current_index(&self) -> usize {
        let mut state = self.state.lock();
        let index = state.current;
        state.deficit = state.deficit.saturating_sub(1);
        if state.deficit == 0 && !self.quanta.is_empty() {
            state.current = (state.current + 1) % self.quanta.len();
            state.deficit = self.quanta[state.current];
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visits_levels_in_proportion_to_weight() {
        let mux = WeightedRoundRobinMultiplexer::new(vec![3, 2, 1]);
        let order: Vec<usize> = (0..12).map(|_| mux.get_and_advance_current_index()).collect();
        assert_eq!(order, vec![0, 0, 0, 1, 1, 2, 0, 0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_single_level_always_zero() {
        let mux = WeightedRoundRobinMultiplexer::new(vec![1]);
        assert!((0..5).all(|_| mux.get_and_advance_current_index() == 0));
    }
}
