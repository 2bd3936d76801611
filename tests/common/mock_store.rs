//! Mock collection store for testing.
//!
//! Wraps a [`MemoryCollection`], records every call, and can be told to fail
//! reads or writes. Used to check lock exclusivity (no writes while locked)
//! and failure handling (failed flushes, failed passes).

use anon_replication_engine::record::{Customer, RecordId, RecordPatch};
use anon_replication_engine::store::{CollectionStore, Filter, FindOptions, MemoryCollection, StoreFuture};
use anon_replication_engine::ReplicationError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Find(Filter),
    InsertMany(Vec<RecordId>),
    UpdateOne(RecordId),
    Count,
}

impl StoreCall {
    pub fn is_write(&self) -> bool {
        matches!(self, StoreCall::InsertMany(_) | StoreCall::UpdateOne(_))
    }
}

/// Recording wrapper with failure injection.
///
/// # Example
/// ```rust,ignore
/// let target = MockCollection::new("customers_anonymised");
/// target.fail_writes(true);
/// // ... run a tick, observe the error ...
/// assert_eq!(target.write_calls(), 1);
/// ```
pub struct MockCollection {
    inner: MemoryCollection,
    calls: Mutex<Vec<StoreCall>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    /// Fail every write after this many successful ones.
    fail_after_writes: AtomicUsize,
    successful_writes: AtomicUsize,
}

impl MockCollection {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryCollection::new(name),
            calls: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_after_writes: AtomicUsize::new(usize::MAX),
            successful_writes: AtomicUsize::new(0),
        }
    }

    /// The wrapped collection (seeding and inspection bypass recording).
    pub fn inner(&self) -> &MemoryCollection {
        &self.inner
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Configure writes to fail after N successful calls.
    pub fn fail_after(&self, n: usize) {
        self.fail_after_writes.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn write_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.is_write()).count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_read(&self, op: &str) -> Result<(), ReplicationError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ReplicationError::store_msg(op, "injected read failure"));
        }
        Ok(())
    }

    fn check_write(&self, op: &str) -> Result<(), ReplicationError> {
        let done = self.successful_writes.load(Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) || done >= self.fail_after_writes.load(Ordering::SeqCst) {
            return Err(ReplicationError::store_msg(op, "injected write failure"));
        }
        self.successful_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl CollectionStore for MockCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn find(&self, filter: Filter, options: FindOptions) -> StoreFuture<'_, Vec<Customer>> {
        Box::pin(async move {
            self.record(StoreCall::Find(filter.clone()));
            self.check_read("find")?;
            self.inner.find(filter, options).await
        })
    }

    fn insert_many(&self, records: Vec<Customer>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            self.record(StoreCall::InsertMany(records.iter().map(|r| r.id.clone()).collect()));
            self.check_write("insert_many")?;
            self.inner.insert_many(records).await
        })
    }

    fn update_one(&self, id: RecordId, patch: RecordPatch) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            self.record(StoreCall::UpdateOne(id.clone()));
            self.check_write("update_one")?;
            self.inner.update_one(id, patch).await
        })
    }

    fn count(&self, filter: Filter) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.record(StoreCall::Count);
            self.check_read("count")?;
            self.inner.count(filter).await
        })
    }
}
