// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process collection.
//!
//! Used by tests and for dry runs. Counts writes made through the
//! [`CollectionStore`] interface so callers can assert "no write happened".
//! The `seed`/`put` helpers bypass that counter: they stand in for the
//! external writer that owns the source collection.

use super::{CollectionStore, Filter, FindOptions, SortOrder, StoreFuture};
use crate::record::{Customer, RecordId, RecordPatch};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// A collection held in memory.
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    records: Mutex<Vec<Customer>>,
    writes: AtomicU64,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(Vec::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Add records without counting them as writes. Replaces existing ids.
    pub fn seed(&self, records: impl IntoIterator<Item = Customer>) {
        for record in records {
            self.put(record);
        }
    }

    /// Insert or replace one record without counting it as a write.
    pub fn put(&self, record: Customer) {
        let mut records = self.lock();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => records.push(record),
        }
    }

    /// Snapshot of every record, ascending by creation timestamp.
    pub fn all(&self) -> Vec<Customer> {
        let mut records = self.lock().clone();
        sort_records(&mut records, SortOrder::Ascending);
        records
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<Customer> {
        self.lock().iter().find(|r| r.id.as_str() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of insert/update operations that changed this collection.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    // Poisoning only happens if a test panicked mid-mutation; the data is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<Customer>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn sort_records(records: &mut [Customer], order: SortOrder) {
    records.sort_by(|a, b| {
        let ord = a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id));
        match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
}

impl CollectionStore for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, filter: Filter, options: FindOptions) -> StoreFuture<'_, Vec<Customer>> {
        Box::pin(async move {
            let mut matched: Vec<Customer> = self
                .lock()
                .iter()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect();
            sort_records(&mut matched, options.sort);

            let limit = options.limit.unwrap_or(usize::MAX);
            Ok(matched.into_iter().skip(options.skip).take(limit).collect())
        })
    }

    fn insert_many(&self, incoming: Vec<Customer>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut records = self.lock();
            let mut inserted = 0;
            for record in incoming {
                if records.iter().any(|r| r.id == record.id) {
                    continue;
                }
                records.push(record);
                inserted += 1;
            }
            if inserted > 0 {
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
            Ok(inserted)
        })
    }

    fn update_one(&self, id: RecordId, patch: RecordPatch) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut records = self.lock();
            let Some(record) = records.iter_mut().find(|r| r.id == id) else {
                return Ok(false);
            };
            patch.apply_to(record);
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        })
    }

    fn count(&self, filter: Filter) -> StoreFuture<'_, u64> {
        Box::pin(async move { Ok(self.lock().iter().filter(|r| filter.matches(r)).count() as u64) })
    }
}
