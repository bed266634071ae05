//! Event Queue
//!
//! Per-connector FIFO buffer. Producers push concurrently, the owning frame
//! is the single consumer. Every push reports the post-push length so the
//! caller can detect the empty to non-empty edge, and every pop reports the
//! length left behind so the consumer can decide whether to re-queue the
//! connector without a second look at the queue.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Unbounded FIFO with a seal flag
#[derive(Debug)]
pub struct EventQueue<T> {
    state: Mutex<QueueState<T>>,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    sealed: bool,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Pre-allocate room for `capacity` events; the queue still grows on demand
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                sealed: false,
            }),
        }
    }

    /// Append an event, returning the queue length after the push.
    ///
    /// A sealed queue hands the event back untouched.
    pub fn push(&self, item: T) -> Result<usize, T> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(item);
        }
        state.items.push_back(item);
        Ok(state.items.len())
    }

    /// Remove the oldest event together with the number still buffered
    pub fn pop(&self) -> Option<(T, usize)> {
        let mut state = self.state.lock();
        let item = state.items.pop_front()?;
        Some((item, state.items.len()))
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further pushes. Returns `true` on the open to sealed transition.
    ///
    /// Events already buffered stay available to `pop`.
    pub fn seal(&self) -> bool {
        let mut state = self.state.lock();
        !std::mem::replace(&mut state.sealed, true)
    }

    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Drop every buffered event, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_reports_edge() {
        let queue = EventQueue::new();
        assert_eq!(queue.push(1), Ok(1));
        assert_eq!(queue.push(2), Ok(2));
        assert_eq!(queue.pop(), Some((1, 1)));
        assert_eq!(queue.pop(), Some((2, 0)));
        assert_eq!(queue.pop(), None);
        // empty again, so the next push is a fresh edge
        assert_eq!(queue.push(3), Ok(1));
    }

    #[test]
    fn test_sealed_queue_rejects_but_drains() {
        let queue = EventQueue::new();
        queue.push("a").unwrap();
        assert!(queue.seal());
        assert!(!queue.seal());
        assert_eq!(queue.push("b"), Err("b"));
        assert_eq!(queue.pop(), Some(("a", 0)));
        assert!(queue.is_sealed());
    }

    #[test]
    fn test_clear_reports_dropped() {
        let queue = EventQueue::with_capacity(8);
        for i in 0..5 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_exactly_one_producer_sees_the_edge() {
        let queue = Arc::new(EventQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|producer| {
                let queue = queue.clone();
                thread::spawn(move || {
                    (0..1000)
                        .filter(|i| queue.push(producer * 1000 + i).unwrap() == 1)
                        .count()
                })
            })
            .collect();

        let edges: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(edges, 1);
        assert_eq!(queue.len(), 8000);
    }
}
