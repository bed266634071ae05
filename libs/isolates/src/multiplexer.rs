//! Multiplexer
//!
//! Tracks a frame's connectors and the order in which connectors with
//! pending events are serviced. The policy is round-robin: the connector at
//! the head of the pending queue is drained for at most one quantum, then
//! rotated to the tail if its queue is still non-empty.
//!
//! The pending queue itself lives under the frame monitor; the connector
//! table has its own lock so `add` can run while the frame is servicing.

use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::connector::{ConnectorId, Port};
use crate::isolate::Isolate;

/// Service order of connectors known to have pending events.
///
/// A connector enters through [`mark`](Self::mark) on its empty to
/// non-empty edge and re-enters through [`requeue`](Self::requeue) only
/// when the pop that ended its turn left events behind, so it is never
/// queued twice.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    order: VecDeque<ConnectorId>,
}

impl PendingQueue {
    pub fn mark(&mut self, id: ConnectorId) {
        debug_assert!(!self.order.contains(&id), "connector {id} queued twice");
        self.order.push_back(id);
    }

    pub fn next(&mut self) -> Option<ConnectorId> {
        self.order.pop_front()
    }

    pub fn requeue(&mut self, id: ConnectorId) {
        self.mark(id);
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}

pub(crate) struct Multiplexer<I: Isolate> {
    ports: RwLock<BTreeMap<ConnectorId, Arc<dyn Port<I>>>>,
    quantum: usize,
}

impl<I: Isolate> Multiplexer<I> {
    pub fn new(quantum: usize) -> Self {
        Self {
            ports: RwLock::new(BTreeMap::new()),
            quantum: quantum.max(1),
        }
    }

    /// Events served from one connector before rotating
    pub fn quantum(&self) -> usize {
        self.quantum
    }

    pub fn add(&self, port: Arc<dyn Port<I>>) {
        self.ports.write().insert(port.id(), port);
    }

    pub fn remove(&self, id: ConnectorId) -> Option<Arc<dyn Port<I>>> {
        self.ports.write().remove(&id)
    }

    pub fn port(&self, id: ConnectorId) -> Option<Arc<dyn Port<I>>> {
        self.ports.read().get(&id).cloned()
    }

    pub fn find(&self, local_name: &str) -> Option<Arc<dyn Port<I>>> {
        self.ports
            .read()
            .values()
            .find(|port| port.local_name() == local_name)
            .cloned()
    }

    /// Snapshot of every connector, in id order
    pub fn ports(&self) -> Vec<Arc<dyn Port<I>>> {
        self.ports.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ports.read().len()
    }

    /// No non-daemon connector can deliver anything ever again
    pub fn is_orphaned(&self) -> bool {
        self.ports
            .read()
            .values()
            .filter(|port| !port.is_daemon())
            .all(|port| port.is_sealed() && port.pending() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_rotation() {
        let (a, b, c) = (ConnectorId::new(2), ConnectorId::new(3), ConnectorId::new(4));
        let mut pending = PendingQueue::default();
        pending.mark(a);
        pending.mark(b);

        // a still has events after its turn, b does not
        let first = pending.next().unwrap();
        assert_eq!(first, a);
        pending.requeue(first);
        assert_eq!(pending.next(), Some(b));

        pending.mark(c);
        assert_eq!(pending.next(), Some(a));
        assert_eq!(pending.next(), Some(c));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut pending = PendingQueue::default();
        pending.mark(ConnectorId::EVENTS);
        pending.mark(ConnectorId::INTERNAL);
        assert_eq!(pending.len(), 2);
        pending.clear();
        assert_eq!(pending.next(), None);
    }
}
