use serde::{Deserialize, Serialize};
use slbrin_types::Record;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaState {
    #[default]
    Active,
    Merging,
}

/// Bounded append-only buffer of records inserted since the last merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaBuffer {
    records: Vec<Record>,
    capacity: usize,
    state: DeltaState,
}

impl DeltaBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            state: DeltaState::Active,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> DeltaState {
        self.state
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Append a record; `false` when the buffer is full.
    pub fn push(&mut self, record: Record) -> bool {
        if self.is_full() {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Hand the buffered records, stably sorted by key, to a merge.
    pub fn begin_merge(&mut self) -> Vec<Record> {
        self.state = DeltaState::Merging;
        let mut records = std::mem::replace(&mut self.records, Vec::with_capacity(self.capacity));
        records.sort_by_key(|r| r.key);
        records
    }

    pub fn finish_merge(&mut self) {
        self.state = DeltaState::Active;
    }
}
