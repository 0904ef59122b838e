use crate::record::{PendingRecord, RecordKey};
use std::collections::BTreeMap;

/// Pending records ranked by [`RecordKey`].
///
/// Not synchronized on its own: the owning block mutates it only while
/// holding its state lock.
#[derive(Debug)]
pub struct OrderingStore<T> {
    records: BTreeMap<RecordKey, PendingRecord<T>>,
}

impl<T> OrderingStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    /// Insert a record. Returns false if a record with the same key is
    /// already live, which would mean a sequence number was reused.
    pub fn insert(&mut self, record: PendingRecord<T>) -> bool {
        match self.records.entry(record.key) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Highest-ranked record, if any
    pub fn peek(&self) -> Option<&PendingRecord<T>> {
        self.records.values().next()
    }

    /// Remove a record by identity
    pub fn remove(&mut self, key: &RecordKey) -> Option<PendingRecord<T>> {
        self.records.remove(key)
    }

    /// Remove and return the highest-ranked record
    pub fn pop(&mut self) -> Option<PendingRecord<T>> {
        self.records.pop_first().map(|(_, record)| record)
    }

    /// Drop every record, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.records.len();
        self.records.clear();
        discarded
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are live
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T> Default for OrderingStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
