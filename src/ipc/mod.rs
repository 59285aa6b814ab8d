//! RPC call queueing.
//!
//! Handler threads take calls from a [`CallQueueManager`], which fronts a swappable
//! [`BlockingQueue`]. Backing queues are built by name through a [`QueueRegistry`]:
//! - `fifo`: a single bounded channel ([`FifoCallQueue`]),
//! - `fair`: per-priority-level channels fed by an [`RpcScheduler`] and drained in weighted
//!   round-robin order ([`FairCallQueue`]).

pub mod call;
pub mod fair_call_queue;
pub mod fifo;
pub mod manager;
pub mod multiplexer;
pub mod registry;
pub mod rpc_scheduler;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub use call::{Call, CallIdentity};
pub use fair_call_queue::FairCallQueue;
pub use fifo::FifoCallQueue;
pub use manager::{CallQueueManager, SwapState};
pub use multiplexer::WeightedRoundRobinMultiplexer;
pub use registry::QueueRegistry;
pub use rpc_scheduler::{DecayRpcScheduler, DefaultRpcScheduler, RpcScheduler};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity handed to every backing queue instance.
pub(crate) fn next_queue_id() -> u64 {
    NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Bounded, thread-safe queue of calls.
///
/// Rejected elements are handed back in the `Err` variant so callers can retry without cloning.
pub trait BlockingQueue<E>: Send + Sync {
    /// Unique per instance; used to tell two queues of the same kind apart.
    fn id(&self) -> u64;

    /// Registry key the queue was built under.
    fn name(&self) -> &str;

    /// Insert, waiting at most `timeout` for space.
    fn put_timeout(&self, element: E, timeout: Duration) -> Result<(), E>;

    /// Insert without waiting.
    fn offer(&self, element: E) -> Result<(), E>;

    /// Remove the next element, waiting at most `timeout` for one.
    fn poll(&self, timeout: Duration) -> Option<E>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}
