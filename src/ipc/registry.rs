//! Named constructors for backing queues.
//!
//! Each key may register up to three constructor shapes. [`QueueRegistry::build`] uses the
//! richest one available: `(capacity, namespace, config)`, then `(capacity)`, then no
//! arguments. A missing key or a failing constructor is an error for the caller to handle; the
//! registry never falls back to another key.

use super::fair_call_queue::{FairCallQueue, FAIR_QUEUE_KIND};
use super::{BlockingQueue, CallIdentity, FifoCallQueue};
use crate::config::CallQueueConfig;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub const FIFO_QUEUE_KIND: &str = "fifo";

pub type SharedQueue<E> = Arc<dyn BlockingQueue<E>>;

pub type FullConstructor<E> =
    Box<dyn Fn(usize, &str, &CallQueueConfig) -> Result<SharedQueue<E>> + Send + Sync>;
pub type SizedConstructor<E> = Box<dyn Fn(usize) -> Result<SharedQueue<E>> + Send + Sync>;
pub type DefaultConstructor<E> = Box<dyn Fn() -> Result<SharedQueue<E>> + Send + Sync>;

struct Constructors<E> {
    full: Option<FullConstructor<E>>,
    sized: Option<SizedConstructor<E>>,
    default: Option<DefaultConstructor<E>>,
}

impl<E> Constructors<E> {
    fn empty() -> Self {
        Self {
            full: None,
            sized: None,
            default: None,
        }
    }
}

/// Backing queue constructors keyed by kind name.
pub struct QueueRegistry<E> {
    entries: RwLock<HashMap<String, Constructors<E>>>,
}

impl<E> QueueRegistry<E> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_full<F>(&self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(usize, &str, &CallQueueConfig) -> Result<SharedQueue<E>> + Send + Sync + 'static,
    {
        self.entries
            .write()
            .entry(kind.into())
            .or_insert_with(Constructors::empty)
            .full = Some(Box::new(constructor));
    }

    pub fn register_sized<F>(&self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(usize) -> Result<SharedQueue<E>> + Send + Sync + 'static,
    {
        self.entries
            .write()
            .entry(kind.into())
            .or_insert_with(Constructors::empty)
            .sized = Some(Box::new(constructor));
    }

    pub fn register_default<F>(&self, kind: impl Into<String>, constructor: F)
    where
        F: Fn() -> Result<SharedQueue<E>> + Send + Sync + 'static,
    {
        self.entries
            .write()
            .entry(kind.into())
            .or_insert_with(Constructors::empty)
            .default = Some(Box::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.read().contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.entries.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Build the queue `config.kind` names.
    ///
    /// # Returns
    /// The new queue, `UnknownQueueKind` if nothing is registered under the key, or the
    /// constructor's own error.
    pub fn build(&self, config: &CallQueueConfig) -> Result<SharedQueue<E>> {
        let entries = self.entries.read();
        let unknown = || Error::UnknownQueueKind {
            kind: config.kind.clone(),
        };
        let constructors = entries.get(&config.kind).ok_or_else(unknown)?;
        if let Some(full) = &constructors.full {
            full(config.capacity, &config.namespace, config)
        } else if let Some(sized) = &constructors.sized {
            sized(config.capacity)
        } else if let Some(default) = &constructors.default {
            default()
        } else {
            Err(unknown())
        }
    }
}

impl<E: Send + 'static> QueueRegistry<E> {
    /// Registry with the `fifo` queue only, for elements without a caller identity.
    pub fn with_fifo() -> Self {
        let registry = Self::new();
        registry.register_sized(FIFO_QUEUE_KIND, |capacity| {
            Ok(Arc::new(FifoCallQueue::new(FIFO_QUEUE_KIND, capacity)) as SharedQueue<E>)
        });
        registry
    }
}

impl<E: CallIdentity + Send + 'static> QueueRegistry<E> {
    /// Registry with the `fifo` and `fair` queues.
    pub fn with_defaults() -> Self {
        let registry = Self::with_fifo();
        registry.register_full(FAIR_QUEUE_KIND, |capacity, namespace, config| {
            let queue = FairCallQueue::from_config(capacity, namespace, &config.fair)?;
            Ok(Arc::new(queue) as SharedQueue<E>)
        });
        registry
    }
}

impl<E> Default for QueueRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::Call;

    #[test]
    fn test_unknown_kind_is_an_error() {
        let registry: QueueRegistry<Call> = QueueRegistry::with_defaults();
        let config = CallQueueConfig::default().with_kind("lottery");
        assert!(matches!(
            registry.build(&config),
            Err(Error::UnknownQueueKind { .. })
        ));
    }

    #[test]
    fn test_richest_constructor_wins() {
        let registry: QueueRegistry<u32> = QueueRegistry::new();
        registry.register_default("custom", || {
            Ok(Arc::new(FifoCallQueue::new("default", 1)) as SharedQueue<u32>)
        });
        let config = CallQueueConfig::default().with_kind("custom").with_capacity(7);
        assert_eq!(registry.build(&config).unwrap().capacity(), 1);

        registry.register_sized("custom", |capacity| {
            Ok(Arc::new(FifoCallQueue::new("sized", capacity)) as SharedQueue<u32>)
        });
        assert_eq!(registry.build(&config).unwrap().name(), "sized");

        registry.register_full("custom", |capacity, _, _| {
            Ok(Arc::new(FifoCallQueue::new("full", capacity * 2)) as SharedQueue<u32>)
        });
        let queue = registry.build(&config).unwrap();
        assert_eq!(queue.name(), "full");
        assert_eq!(queue.capacity(), 14);
    }

    #[test]
    fn test_constructor_errors_propagate() {
        let registry: QueueRegistry<Call> = QueueRegistry::with_defaults();
        let mut config = CallQueueConfig::default().with_kind("fair");
        config.fair.levels = 0;
        assert!(matches!(
            registry.build(&config),
            Err(Error::QueueConstruction { .. })
        ));
        assert_eq!(registry.kinds(), vec!["fair", "fifo"]);
    }
}
