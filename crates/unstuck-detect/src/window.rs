use std::collections::VecDeque;
use unstuck_core::IterationRecord;

/// Fixed-capacity buffer of the most recent iteration records for one task
///
/// Pushing into a full window evicts the oldest record, so the window never
/// holds more than its capacity.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    records: VecDeque<IterationRecord>,
    capacity: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, returning the evicted one if the window was full
    pub fn push(&mut self, record: IterationRecord) -> Option<IterationRecord> {
        let evicted = if self.records.len() == self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &IterationRecord> + ExactSizeIterator {
        self.records.iter()
    }

    /// The `n` most recent records, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &IterationRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
