//! Bounded FIFO buffer of recent events.
//!
//! Capacity is fixed at construction. Appending at capacity evicts the
//! oldest entry and hands it back to the caller; eviction never blocks.
//! `snapshot` is a point-in-time copy, so holders of an
//! `Arc<Mutex<EventBuffer>>` see entirely-before or entirely-after any
//! concurrent append, never a torn state.

use std::collections::VecDeque;

use crate::event::FinancialEvent;

#[derive(Debug)]
pub struct EventBuffer {
    capacity: usize,
    events: VecDeque<FinancialEvent>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, events: VecDeque::with_capacity(capacity) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append, evicting the oldest entry first when full.
    pub fn append(&mut self, event: FinancialEvent) -> Option<FinancialEvent> {
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    /// Point-in-time copy, oldest-first / most-recent-last.
    pub fn snapshot(&self) -> Vec<FinancialEvent> {
        self.events.iter().cloned().collect()
    }

    /// Amounts of the most recent `n` events, for score context.
    pub fn recent_amounts(&self, n: usize) -> Vec<f64> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).map(|e| e.amount).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, EventMeta};

    fn event(id: u32) -> FinancialEvent {
        FinancialEvent {
            id: format!("e-{}", id),
            ts_ms: id as u64,
            kind: EventKind::Transaction,
            source: "test".to_string(),
            amount: id as f64,
            currency: "BDT".to_string(),
            account_id: "a".to_string(),
            metadata: EventMeta::credit(),
        }
    }

    #[test]
    fn test_append_under_capacity_evicts_nothing() {
        let mut buf = EventBuffer::new(3);
        assert!(buf.append(event(1)).is_none());
        assert!(buf.append(event(2)).is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_append_at_capacity_evicts_oldest() {
        let mut buf = EventBuffer::new(2);
        buf.append(event(1));
        buf.append(event(2));
        let evicted = buf.append(event(3)).expect("oldest should be evicted");
        assert_eq!(evicted.id, "e-1");
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].id, "e-2");
        assert_eq!(snap[1].id, "e-3");
    }

    #[test]
    fn test_capacity_invariant_over_long_sequence() {
        let mut buf = EventBuffer::new(1_000);
        for i in 0..1_500 {
            buf.append(event(i));
        }
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 1_000);
        // Exactly the 1000 most recent, in original relative order.
        for (offset, e) in snap.iter().enumerate() {
            assert_eq!(e.id, format!("e-{}", 500 + offset));
        }
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let mut buf = EventBuffer::new(4);
        buf.append(event(1));
        buf.append(event(2));
        let s1 = buf.snapshot();
        let s2 = buf.snapshot();
        assert_eq!(s1.len(), s2.len());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_recent_amounts_takes_tail() {
        let mut buf = EventBuffer::new(10);
        for i in 1..=5 {
            buf.append(event(i));
        }
        assert_eq!(buf.recent_amounts(3), vec![3.0, 4.0, 5.0]);
        assert_eq!(buf.recent_amounts(50).len(), 5);
    }
}
