//! Call queue manager with a hot-swappable backing queue.
//!
//! Producers and consumers go through two independent references:
//! - `put_ref`: the queue new calls are inserted into,
//! - `take_ref`: the queue handlers take calls from.
//!
//! Outside a swap both point at the same queue. A swap repoints `put_ref` first, waits until
//! the old queue is observed empty on `drain.checks` consecutive probes, then repoints
//! `take_ref`. Calls already in the old queue, or blocked on inserting into it, are delivered
//! before handlers move to the new queue.

use super::registry::{QueueRegistry, SharedQueue};
use crate::config::CallQueueConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Observable phase of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    /// Producers and consumers share one queue.
    Steady,
    /// Producers use `new`; consumers still drain `old`.
    Draining { old: u64, new: u64 },
}

/// Settings the manager reads on every call; replaced by a swap.
#[derive(Debug, Clone, Copy)]
struct Knobs {
    client_backoff: bool,
    poll_interval: Duration,
}

impl Knobs {
    fn from_config(config: &CallQueueConfig) -> Self {
        Self {
            client_backoff: config.client_backoff,
            poll_interval: config.take_poll_interval(),
        }
    }
}

pub struct CallQueueManager<E> {
    namespace: String,
    registry: Arc<QueueRegistry<E>>,
    put_ref: RwLock<SharedQueue<E>>,
    take_ref: RwLock<SharedQueue<E>>,
    knobs: RwLock<Knobs>,
    /// Serializes swaps.
    swap_lock: Mutex<()>,
    shutdown: AtomicBool,
    metrics: Arc<dyn MetricsSink>,
}

impl<E: Send + 'static> CallQueueManager<E> {
    /// Build the manager and its first backing queue.
    ///
    /// # Arguments
    /// * `config` - Queue kind, capacity and manager knobs
    /// * `registry` - Constructors for every kind a later swap may ask for
    /// * `metrics` - Sink for size and swap counters
    pub fn new(
        config: &CallQueueConfig,
        registry: Arc<QueueRegistry<E>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        config.drain.validate()?;
        let queue = registry.build(config)?;
        info!(namespace = %config.namespace, kind = %queue.name(), id = queue.id(), capacity = queue.capacity(), "Call queue created");
        Ok(Self {
            namespace: config.namespace.clone(),
            registry,
            put_ref: RwLock::new(queue.clone()),
            take_ref: RwLock::new(queue),
            knobs: RwLock::new(Knobs::from_config(config)),
            swap_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            metrics,
        })
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Insert `element`, waiting for space on the queue that was current when the call began.
    ///
    /// Staying on that queue keeps the call ahead of anything inserted after a concurrent swap.
    pub fn put(&self, element: E) -> Result<()> {
        let queue = self.put_ref.read().clone();
        let poll_interval = self.knobs.read().poll_interval;
        let mut element = element;
        loop {
            if self.is_shut_down() {
                return Err(Error::Shutdown);
            }
            match queue.put_timeout(element, poll_interval) {
                Ok(()) => return Ok(()),
                Err(rejected) => element = rejected,
            }
        }
    }

    /// Insert without waiting; a full (or shut down) queue hands the element back.
    pub fn offer(&self, element: E) -> std::result::Result<(), E> {
        if self.is_shut_down() {
            return Err(element);
        }
        let queue = self.put_ref.read().clone();
        queue.offer(element)
    }

    /// Insert according to the backoff setting: reject when full, or block like [`Self::put`].
    pub fn add(&self, element: E) -> Result<()> {
        if !self.is_client_backoff_enabled() {
            return self.put(element);
        }
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }
        self.offer(element).map_err(|_| {
            self.metrics.increment(&self.namespace, "overflows", 1);
            Error::QueueOverflow
        })
    }

    /// Remove the next call, waiting as long as it takes.
    pub fn take(&self) -> Result<E> {
        loop {
            if self.is_shut_down() {
                return Err(Error::Shutdown);
            }
            let poll_interval = self.knobs.read().poll_interval;
            let queue = self.take_ref.read().clone();
            if let Some(element) = queue.poll(poll_interval) {
                return Ok(element);
            }
        }
    }

    /// Remove the next call, waiting at most `timeout`.
    pub fn poll(&self, timeout: Duration) -> Option<E> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_shut_down() {
                return None;
            }
            let queue = self.take_ref.read().clone();
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait = remaining.min(self.knobs.read().poll_interval);
            if let Some(element) = queue.poll(wait) {
                return Some(element);
            }
            if remaining.is_zero() {
                return None;
            }
        }
    }

    /// Queued calls, counting both queues while a swap drains.
    pub fn size(&self) -> usize {
        let take = self.take_ref.read().clone();
        let put = self.put_ref.read().clone();
        if take.id() == put.id() {
            take.len()
        } else {
            take.len() + put.len()
        }
    }

    /// Capacity of the queue producers currently insert into.
    pub fn capacity(&self) -> usize {
        self.put_ref.read().capacity()
    }

    pub fn is_client_backoff_enabled(&self) -> bool {
        self.knobs.read().client_backoff
    }

    /// Registry key of the queue producers currently insert into.
    pub fn queue_kind(&self) -> String {
        self.put_ref.read().name().to_string()
    }

    pub fn state(&self) -> SwapState {
        let take = self.take_ref.read().id();
        let put = self.put_ref.read().id();
        if take == put {
            SwapState::Steady
        } else {
            SwapState::Draining { old: take, new: put }
        }
    }

    /// Replace the backing queue with the one `config` describes.
    ///
    /// Blocks until the old queue has drained. An invalid drain setting or a construction
    /// failure returns before any reference changes, leaving the current queue in service.
    /// Shutdown during the drain returns `Error::Shutdown` with consumers still on the old queue.
    pub fn swap_queue(&self, config: &CallQueueConfig) -> Result<()> {
        let _swap = self.swap_lock.lock();
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }

        let built = config
            .drain
            .validate()
            .and_then(|()| self.registry.build(config));
        let new_queue = match built {
            Ok(queue) => queue,
            Err(err) => {
                warn!(namespace = %self.namespace, kind = %config.kind, error = %err, "Call queue swap aborted");
                return Err(err);
            }
        };
        let old_queue = self.put_ref.read().clone();

        *self.put_ref.write() = new_queue.clone();
        *self.knobs.write() = Knobs::from_config(config);
        debug!(namespace = %self.namespace, old = old_queue.id(), new = new_queue.id(), "Producers switched, draining old queue");

        self.wait_until_drained(&old_queue, config)?;

        *self.take_ref.write() = new_queue.clone();
        self.metrics.increment(&self.namespace, "swaps", 1);
        info!(
            namespace = %self.namespace,
            old_kind = %old_queue.name(),
            old = old_queue.id(),
            new_kind = %new_queue.name(),
            new = new_queue.id(),
            capacity = new_queue.capacity(),
            "Call queue swapped"
        );
        Ok(())
    }

    /// Sleep-then-check until `queue` is empty on `drain.checks` consecutive probes.
    fn wait_until_drained(&self, queue: &SharedQueue<E>, config: &CallQueueConfig) -> Result<()> {
        let interval = config.drain.interval();
        let mut consecutive = 0;
        while consecutive < config.drain.checks {
            if self.is_shut_down() {
                return Err(Error::Shutdown);
            }
            std::thread::sleep(interval);
            if queue.is_empty() {
                consecutive += 1;
            } else {
                consecutive = 0;
            }
        }
        Ok(())
    }

    /// Release every blocked `put`, `take` and drain probe.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            info!(namespace = %self.namespace, remaining = self.size(), "Call queue manager shut down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shut_down()
    }

    /// Publish size, capacity and swap phase gauges.
    pub fn publish_metrics(&self) {
        self.metrics
            .gauge(&self.namespace, "size", self.size() as f64);
        self.metrics
            .gauge(&self.namespace, "capacity", self.capacity() as f64);
        let draining = matches!(self.state(), SwapState::Draining { .. });
        self.metrics
            .gauge(&self.namespace, "draining", if draining { 1.0 } else { 0.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DrainConfig;
    use crate::metrics::{MetricsCollector, NoopMetrics};

    fn fast_config(capacity: usize) -> CallQueueConfig {
        CallQueueConfig {
            capacity,
            take_poll_interval_ms: 2,
            drain: DrainConfig {
                checks: 3,
                interval_ms: 2,
            },
            ..CallQueueConfig::default()
        }
    }

    fn manager(config: &CallQueueConfig) -> CallQueueManager<u64> {
        CallQueueManager::new(config, Arc::new(QueueRegistry::with_fifo()), Arc::new(NoopMetrics))
            .unwrap()
    }

    #[test]
    fn test_put_take_in_order() {
        let manager = manager(&fast_config(4));
        manager.put(1).unwrap();
        manager.put(2).unwrap();
        assert_eq!(manager.size(), 2);
        assert_eq!(manager.take().unwrap(), 1);
        assert_eq!(manager.take().unwrap(), 2);
        assert_eq!(manager.poll(Duration::from_millis(5)), None);
    }

    #[test]
    fn test_offer_returns_element_when_full() {
        let manager = manager(&fast_config(1));
        assert!(manager.offer(1).is_ok());
        assert_eq!(manager.offer(2), Err(2));
    }

    #[test]
    fn test_add_with_backoff_overflows() {
        let metrics = MetricsCollector::shared();
        let mut config = fast_config(1);
        config.client_backoff = true;
        let manager =
            CallQueueManager::new(&config, Arc::new(QueueRegistry::with_fifo()), metrics.clone())
                .unwrap();
        assert!(manager.is_client_backoff_enabled());
        manager.add(1).unwrap();
        assert!(matches!(manager.add(2), Err(Error::QueueOverflow)));
        assert_eq!(metrics.snapshot().counter("ipc", "overflows"), Some(1));
    }

    #[test]
    fn test_swap_on_empty_queue_changes_capacity() {
        let manager = manager(&fast_config(4));
        manager.swap_queue(&fast_config(16)).unwrap();
        assert_eq!(manager.capacity(), 16);
        assert_eq!(manager.state(), SwapState::Steady);
    }

    #[test]
    fn test_failed_swap_keeps_current_queue() {
        let manager = manager(&fast_config(4));
        manager.put(9).unwrap();
        let result = manager.swap_queue(&fast_config(8).with_kind("missing"));
        assert!(matches!(result, Err(Error::UnknownQueueKind { .. })));
        assert_eq!(manager.capacity(), 4);
        assert_eq!(manager.take().unwrap(), 9);
    }

    #[test]
    fn test_swap_without_drain_checks_keeps_queued_call() {
        let manager = manager(&fast_config(4));
        manager.put(7).unwrap();

        let mut no_probe = fast_config(8);
        no_probe.drain.checks = 0;
        let result = manager.swap_queue(&no_probe);
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
        assert_eq!(manager.capacity(), 4);
        assert_eq!(manager.state(), SwapState::Steady);
        assert_eq!(manager.size(), 1);
        assert_eq!(manager.poll(Duration::from_millis(50)), Some(7));
    }

    #[test]
    fn test_shutdown_releases_blocked_take() {
        let manager = Arc::new(manager(&fast_config(4)));
        let taker = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.take())
        };
        std::thread::sleep(Duration::from_millis(20));
        manager.shutdown();
        assert!(matches!(taker.join().unwrap(), Err(Error::Shutdown)));
        assert!(matches!(manager.put(1), Err(Error::Shutdown)));
    }
}
