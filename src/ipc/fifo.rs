use super::{next_queue_id, BlockingQueue};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// Single bounded FIFO channel.
pub struct FifoCallQueue<E> {
    id: u64,
    name: String,
    capacity: usize,
    sender: Sender<E>,
    receiver: Receiver<E>,
}

impl<E> FifoCallQueue<E> {
    /// Create a queue holding at most `capacity` elements (at least one).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        Self {
            id: next_queue_id(),
            name: name.into(),
            capacity,
            sender,
            receiver,
        }
    }

    /// Remove the head without waiting.
    pub fn try_take(&self) -> Option<E> {
        self.receiver.try_recv().ok()
    }

    pub fn is_full(&self) -> bool {
        self.sender.is_full()
    }
}

impl<E: Send> BlockingQueue<E> for FifoCallQueue<E> {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn put_timeout(&self, element: E, timeout: Duration) -> Result<(), E> {
        // Both ends live in `self`, so the channel never disconnects.
        self.sender
            .send_timeout(element, timeout)
            .map_err(|err| match err {
                SendTimeoutError::Timeout(e) | SendTimeoutError::Disconnected(e) => e,
            })
    }

    fn offer(&self, element: E) -> Result<(), E> {
        self.sender.try_send(element).map_err(|err| match err {
            TrySendError::Full(e) | TrySendError::Disconnected(e) => e,
        })
    }

    fn poll(&self, timeout: Duration) -> Option<E> {
        self.receiver.recv_timeout(timeout).ok()
    }

    fn len(&self) -> usize {
        self.receiver.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_and_bounds() {
        let queue = FifoCallQueue::new("fifo", 2);
        assert!(queue.is_empty());
        assert!(queue.offer(1).is_ok());
        assert!(queue.offer(2).is_ok());
        assert_eq!(queue.offer(3), Err(3));
        assert!(queue.is_full());

        assert_eq!(queue.poll(Duration::from_millis(1)), Some(1));
        assert_eq!(queue.try_take(), Some(2));
        assert_eq!(queue.poll(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_put_timeout_returns_element_when_full() {
        let queue = FifoCallQueue::new("fifo", 1);
        queue.put_timeout(1, Duration::from_millis(1)).unwrap();
        assert_eq!(queue.put_timeout(2, Duration::from_millis(5)), Err(2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let queue: FifoCallQueue<u8> = FifoCallQueue::new("fifo", 0);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let a: FifoCallQueue<u8> = FifoCallQueue::new("fifo", 1);
        let b: FifoCallQueue<u8> = FifoCallQueue::new("fifo", 1);
        assert_ne!(a.id(), b.id());
    }
}
