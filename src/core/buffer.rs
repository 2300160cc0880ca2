//! Bounded, flushable record accumulator.

use crate::core::record::Record;

/// Accumulates records for one detector until the flush threshold is reached.
///
/// The buffer never holds `threshold` records: the push that reaches the
/// threshold swaps the contents out and returns them as a batch.
#[derive(Debug)]
pub struct SessionBuffer {
    records: Vec<Record>,
    threshold: usize,
}

impl SessionBuffer {
    /// Create a buffer. A threshold of zero is treated as one.
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            records: Vec::with_capacity(threshold),
            threshold,
        }
    }

    /// Append a record. Returns the full batch when the threshold is reached.
    pub fn push(&mut self, record: Record) -> Option<Vec<Record>> {
        self.records.push(record);
        if self.records.len() >= self.threshold {
            Some(self.take())
        } else {
            None
        }
    }

    /// Take ownership of the current contents, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<Record> {
        std::mem::replace(&mut self.records, Vec::with_capacity(self.threshold))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}
