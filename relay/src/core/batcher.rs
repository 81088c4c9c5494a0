//! Bulk Batcher: coalesces bulk records into size- or interval-triggered batches.
//!
//! The flush-interval ticker itself lives in the core event loop (see
//! `aggregator.rs`), started/stopped as the bulk-listener population becomes
//! non-empty/empty; this type only owns the FIFO queue and the pure
//! size-trigger/drain logic, mirroring how `telemetry_core::aggregator::inner_loop`
//! keeps its own `Interval` in the loop and treats its queues as plain data.

use super::constants::MAX_BATCH_SIZE;
use super::types::BulkRecord;
use std::collections::VecDeque;

pub struct Batcher {
    queue: VecDeque<BulkRecord>,
}

impl Batcher {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueue a record. Returns `true` if this push reached the size trigger
    /// and the queue should be flushed immediately.
    pub fn push(&mut self, record: BulkRecord) -> bool {
        self.queue.push_back(record);
        self.queue.len() >= MAX_BATCH_SIZE
    }

    /// Drain up to `MAX_BATCH_SIZE` records in FIFO order, if any are queued.
    /// Per the documented policy (see DESIGN.md), callers only invoke this
    /// when at least one bulk-listener is registered; with none registered the
    /// queue is left to accumulate rather than being drained here.
    pub fn flush(&mut self) -> Option<Vec<BulkRecord>> {
        if self.queue.is_empty() {
            return None;
        }
        let drain_count = MAX_BATCH_SIZE.min(self.queue.len());
        Some(self.queue.drain(..drain_count).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::types::ConnId;

    fn record(n: u64) -> BulkRecord {
        BulkRecord {
            timestamp: n,
            producer_id: ConnId::from_raw("p"),
            username: None,
            fields: serde_json::Map::new(),
        }
    }

    #[test]
    fn push_signals_flush_only_at_max_batch_size() {
        let mut batcher = Batcher::new();
        for n in 0..MAX_BATCH_SIZE - 1 {
            assert!(!batcher.push(record(n as u64)));
        }
        assert!(batcher.push(record(999)));
        assert_eq!(batcher.len(), MAX_BATCH_SIZE);
    }

    #[test]
    fn flush_drains_at_most_max_batch_size_in_fifo_order() {
        let mut batcher = Batcher::new();
        for n in 0..7 {
            batcher.push(record(n));
        }
        let batch = batcher.flush().unwrap();
        assert_eq!(batch.len(), 7);
        assert_eq!(batch.iter().map(|r| r.timestamp).collect::<Vec<_>>(), (0..7).collect::<Vec<_>>());
        assert!(batcher.is_empty());
    }

    #[test]
    fn flush_on_empty_queue_is_none() {
        let mut batcher = Batcher::new();
        assert!(batcher.flush().is_none());
    }

    #[test]
    fn flush_caps_at_max_batch_size_leaving_remainder_queued() {
        let mut batcher = Batcher::new();
        for n in 0..15 {
            batcher.push(record(n));
        }
        let batch = batcher.flush().unwrap();
        assert_eq!(batch.len(), MAX_BATCH_SIZE);
        assert_eq!(batcher.len(), 5);
    }
}
