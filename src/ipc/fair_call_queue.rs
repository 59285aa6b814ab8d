//! Multi-level call queue.
//!
//! Calls are placed on one of N FIFO levels chosen by an [`RpcScheduler`]; each level holds
//! `capacity / N` calls. The level is chosen once per call and the caller is charged only when
//! a level accepts it, so retries under backpressure neither demote the caller nor move the call. Consumers drain the levels in the order a
//! [`WeightedRoundRobinMultiplexer`] dictates, falling through to the next non-empty level when
//! the chosen one is empty.
//!
//! A token channel counts queued calls across all levels: a producer sends one token after its
//! call is on a level, a consumer receives one token before removing a call. Consumers
//! therefore only scan the levels when a call is guaranteed to be there.

use super::{next_queue_id, BlockingQueue, CallIdentity, FifoCallQueue, RpcScheduler};
use super::{DecayRpcScheduler, WeightedRoundRobinMultiplexer};
use crate::config::FairCallQueueConfig;
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const FAIR_QUEUE_KIND: &str = "fair";

pub struct FairCallQueue<E> {
    id: u64,
    namespace: String,
    levels: Vec<FifoCallQueue<E>>,
    scheduler: Arc<dyn RpcScheduler>,
    multiplexer: WeightedRoundRobinMultiplexer,
    token_tx: Sender<()>,
    token_rx: Receiver<()>,
}

impl<E: CallIdentity + Send> FairCallQueue<E> {
    /// Build a queue with one level per entry of `weights`.
    ///
    /// # Arguments
    /// * `capacity` - Total capacity, split evenly between the levels
    /// * `namespace` - Owner of the queue, for logs
    /// * `weights` - Round-robin weight per level, level 0 first
    /// * `scheduler` - Maps a caller to a level
    pub fn new(
        capacity: usize,
        namespace: impl Into<String>,
        weights: Vec<usize>,
        scheduler: Arc<dyn RpcScheduler>,
    ) -> Result<Self> {
        let invalid = |reason: String| Error::QueueConstruction {
            kind: FAIR_QUEUE_KIND.to_string(),
            reason,
        };
        if weights.is_empty() {
            return Err(invalid("at least one priority level is required".to_string()));
        }
        if weights.iter().any(|weight| *weight == 0) {
            return Err(invalid("level weights must be positive".to_string()));
        }
        if scheduler.levels() != weights.len() {
            return Err(invalid(format!(
                "scheduler has {} levels, queue has {}",
                scheduler.levels(),
                weights.len()
            )));
        }

        let per_level = (capacity / weights.len()).max(1);
        let levels = (0..weights.len())
            .map(|_| FifoCallQueue::new(FAIR_QUEUE_KIND, per_level))
            .collect();
        let (token_tx, token_rx) = unbounded();
        Ok(Self {
            id: next_queue_id(),
            namespace: namespace.into(),
            levels,
            scheduler,
            multiplexer: WeightedRoundRobinMultiplexer::new(weights),
            token_tx,
            token_rx,
        })
    }

    /// Build a queue with a [`DecayRpcScheduler`] from configuration.
    pub fn from_config(
        capacity: usize,
        namespace: impl Into<String>,
        config: &FairCallQueueConfig,
    ) -> Result<Self> {
        let scheduler = Arc::new(DecayRpcScheduler::from_config(config)?);
        Self::new(capacity, namespace, config.resolved_weights(), scheduler)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Queued calls per level.
    pub fn level_sizes(&self) -> Vec<usize> {
        self.levels.iter().map(|level| level.len()).collect()
    }

    fn level_for(&self, element: &mut E) -> usize {
        let last = self.levels.len() - 1;
        if let Some(level) = element.priority_level() {
            return level.min(last);
        }
        let level = self.scheduler.priority_level(element.identity()).min(last);
        element.set_priority_level(level);
        level
    }

    fn accepted(&self, identity: &str) {
        self.scheduler.add_call(identity);
        let _ = self.token_tx.send(());
    }

    fn take_one(&self) -> Option<E> {
        let start = self.multiplexer.get_and_advance_current_index();
        let count = self.levels.len();
        (0..count).find_map(|offset| self.levels[(start + offset) % count].try_take())
    }
}

impl<E: CallIdentity + Send> BlockingQueue<E> for FairCallQueue<E> {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        FAIR_QUEUE_KIND
    }

    /// Waits for space on the caller's level only.
    fn put_timeout(&self, mut element: E, timeout: Duration) -> std::result::Result<(), E> {
        let level = self.level_for(&mut element);
        let identity = element.identity().to_string();
        self.levels[level].put_timeout(element, timeout)?;
        self.accepted(&identity);
        Ok(())
    }

    /// Fails when the caller's level is full, even if other levels have room.
    fn offer(&self, mut element: E) -> std::result::Result<(), E> {
        let level = self.level_for(&mut element);
        let identity = element.identity().to_string();
        self.levels[level].offer(element)?;
        self.accepted(&identity);
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Option<E> {
        let deadline = Instant::now() + timeout;
        loop {
            self.token_rx.recv_deadline(deadline).ok()?;
            if let Some(element) = self.take_one() {
                return Some(element);
            }
        }
    }

    fn len(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }

    fn capacity(&self) -> usize {
        self.levels.iter().map(|level| level.capacity()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{Call, DefaultRpcScheduler};

    /// Level taken from the numeric suffix of the caller name.
    struct ByName;

    impl RpcScheduler for ByName {
        fn priority_level(&self, identity: &str) -> usize {
            identity.trim_start_matches("level").parse().unwrap_or(0)
        }

        fn levels(&self) -> usize {
            2
        }
    }

    fn call(id: u64, user: &str) -> Call {
        Call::new(id, user, "ping")
    }

    #[test]
    fn test_capacity_is_split_between_levels() {
        let queue: FairCallQueue<Call> =
            FairCallQueue::new(10, "ipc", vec![2, 1], Arc::new(ByName)).unwrap();
        assert_eq!(queue.capacity(), 10);
        assert_eq!(queue.num_levels(), 2);

        for i in 0..5 {
            queue.offer(call(i, "level1")).unwrap();
        }
        let rejected = queue.offer(call(5, "level1")).unwrap_err();
        assert_eq!(rejected.id, 5);
        assert!(queue.offer(call(6, "level0")).is_ok());
        assert_eq!(queue.level_sizes(), vec![1, 5]);
    }

    #[test]
    fn test_drains_levels_by_weight() {
        let queue: FairCallQueue<Call> =
            FairCallQueue::new(20, "ipc", vec![2, 1], Arc::new(ByName)).unwrap();
        for i in 0..4 {
            queue.offer(call(i, "level0")).unwrap();
            queue.offer(call(100 + i, "level1")).unwrap();
        }

        let order: Vec<u64> = (0..6)
            .map(|_| queue.poll(Duration::from_millis(10)).unwrap().id)
            .collect();
        assert_eq!(order, vec![0, 1, 100, 2, 3, 101]);
    }

    #[test]
    fn test_empty_level_falls_through() {
        let queue: FairCallQueue<Call> =
            FairCallQueue::new(8, "ipc", vec![4, 1], Arc::new(ByName)).unwrap();
        queue.offer(call(7, "level1")).unwrap();
        assert_eq!(queue.poll(Duration::from_millis(10)).unwrap().id, 7);
        assert!(queue.poll(Duration::from_millis(5)).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_blocked_caller_is_charged_once_and_keeps_its_level() {
        let scheduler = Arc::new(
            DecayRpcScheduler::new(2, vec![0.5], 0.5, Duration::from_secs(3600)).unwrap(),
        );
        let queue: FairCallQueue<Call> =
            FairCallQueue::new(2, "ipc", vec![2, 1], scheduler.clone()).unwrap();

        queue.offer(call(1, "u")).unwrap();
        queue.offer(call(2, "u")).unwrap();
        assert_eq!(queue.level_sizes(), vec![1, 1]);
        assert_eq!(scheduler.call_count("u"), 2.0);

        let mut pending = call(3, "u");
        for _ in 0..5 {
            pending = queue
                .put_timeout(pending, Duration::from_millis(1))
                .unwrap_err();
        }
        pending = queue.offer(pending).unwrap_err();
        assert_eq!(pending.priority_level, Some(1));
        assert_eq!(scheduler.call_count("u"), 2.0);

        assert_eq!(queue.poll(Duration::from_millis(10)).unwrap().id, 1);
        assert_eq!(queue.poll(Duration::from_millis(10)).unwrap().id, 2);
        queue.offer(pending).unwrap();
        assert_eq!(queue.level_sizes(), vec![0, 1]);
        assert_eq!(scheduler.call_count("u"), 3.0);
    }

    #[test]
    fn test_level_count_mismatch_is_rejected() {
        let result: Result<FairCallQueue<Call>> =
            FairCallQueue::new(8, "ipc", vec![4, 2, 1], Arc::new(DefaultRpcScheduler::new(2)));
        assert!(matches!(result, Err(Error::QueueConstruction { .. })));
    }

    #[test]
    fn test_from_config_uses_defaults() {
        let queue: FairCallQueue<Call> =
            FairCallQueue::from_config(100, "ipc", &FairCallQueueConfig::default()).unwrap();
        assert_eq!(queue.num_levels(), 4);
        assert_eq!(queue.capacity(), 100);
        assert_eq!(queue.namespace(), "ipc");
    }
}
