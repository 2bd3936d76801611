// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collection store interface.
//!
//! Defines what the engine needs from the data store: a generic CRUD
//! collection with find/sort/limit/skip, insert, update and count. The engine
//! never creates or deletes source records and only inserts or updates
//! target records.
//!
//! # Example
//!
//! ```rust,no_run
//! use anon_replication_engine::store::{CollectionStore, Filter, FindOptions, StoreFuture};
//! use anon_replication_engine::record::{Customer, RecordId, RecordPatch};
//!
//! struct MyBackend { /* ... */ }
//!
//! impl CollectionStore for MyBackend {
//!     fn name(&self) -> &str { "customers" }
//!
//!     fn find(&self, _filter: Filter, _options: FindOptions) -> StoreFuture<'_, Vec<Customer>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//!
//!     fn insert_many(&self, records: Vec<Customer>) -> StoreFuture<'_, usize> {
//!         Box::pin(async move { Ok(records.len()) })
//!     }
//!
//!     fn update_one(&self, _id: RecordId, _patch: RecordPatch) -> StoreFuture<'_, bool> {
//!         Box::pin(async move { Ok(false) })
//!     }
//!
//!     fn count(&self, _filter: Filter) -> StoreFuture<'_, u64> {
//!         Box::pin(async move { Ok(0) })
//!     }
//! }
//! ```
//!
//! # Ordering
//!
//! Every read is sorted by creation timestamp (ties broken by id). This is the
//! only ordering contract the engine relies on.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCollection;
pub use sqlite::{SqliteCollection, SqliteStore};

use crate::error::{ReplicationError, Result};
use crate::record::{Customer, RecordId, RecordPatch};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed store futures (reduces trait signature complexity).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Record selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every record.
    All,
    /// Records with creation timestamp strictly greater than the given one.
    CreatedAfter(DateTime<Utc>),
    /// The record with this identity.
    Id(RecordId),
}

impl Filter {
    /// Whether a record is selected by this filter.
    pub fn matches(&self, record: &Customer) -> bool {
        match self {
            Filter::All => true,
            Filter::CreatedAfter(ts) => record.created_at > *ts,
            Filter::Id(id) => record.id == *id,
        }
    }
}

/// Sort direction on the creation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Sort/limit/skip options for [`CollectionStore::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FindOptions {
    pub sort: SortOrder,
    /// Maximum number of records to return (`None` = unbounded).
    pub limit: Option<usize>,
    /// Number of matching records to skip first.
    pub skip: usize,
}

impl FindOptions {
    pub fn ascending() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn descending(mut self) -> Self {
        self.sort = SortOrder::Descending;
        self
    }
}

/// Trait defining what we need from a collection.
///
/// Implementations must be safe to share between the forward syncer and the
/// reconciler. Inserting a record whose id already exists is a no-op, which
/// absorbs the re-insert that follows a crash between flush and checkpoint
/// persist.
pub trait CollectionStore: Send + Sync + 'static {
    /// Collection name (for logging).
    fn name(&self) -> &str;

    /// Find records matching `filter`, sorted by creation timestamp.
    fn find(&self, filter: Filter, options: FindOptions) -> StoreFuture<'_, Vec<Customer>>;

    /// Find the first matching record.
    fn find_one(&self, filter: Filter) -> StoreFuture<'_, Option<Customer>> {
        Box::pin(async move {
            let mut found = self.find(filter, FindOptions::ascending().limit(1)).await?;
            Ok(found.pop())
        })
    }

    /// Insert a single record.
    fn insert_one(&self, record: Customer) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.insert_many(vec![record]).await?;
            Ok(())
        })
    }

    /// Insert records in one bulk write. Returns how many were new.
    fn insert_many(&self, records: Vec<Customer>) -> StoreFuture<'_, usize>;

    /// Apply `patch` to the record with identity `id`.
    ///
    /// Returns `false` if no such record exists.
    fn update_one(&self, id: RecordId, patch: RecordPatch) -> StoreFuture<'_, bool>;

    /// Count matching records.
    fn count(&self, filter: Filter) -> StoreFuture<'_, u64>;
}

/// Oldest record of a collection, if any.
pub async fn oldest(store: &dyn CollectionStore) -> Result<Option<Customer>> {
    let mut found = store
        .find(Filter::All, FindOptions::ascending().limit(1))
        .await?;
    Ok(found.pop())
}

/// Lazily stream every record matching `filter`, ascending by creation timestamp.
///
/// Pages through the collection with limit/skip, `page_size` records at a
/// time. The stream is finite: it ends after the first short page. To start
/// over, call `scan` again.
pub fn scan<'a>(
    store: &'a dyn CollectionStore,
    filter: Filter,
    page_size: usize,
) -> BoxStream<'a, Result<Customer>> {
    let page_size = page_size.max(1);

    stream::try_unfold((0usize, false), move |(skip, exhausted)| {
        let filter = filter.clone();
        async move {
            if exhausted {
                return Ok::<_, ReplicationError>(None);
            }
            let page = store
                .find(filter, FindOptions::ascending().skip(skip).limit(page_size))
                .await?;
            if page.is_empty() {
                return Ok(None);
            }
            let fetched = page.len();
            let next = (skip + fetched, fetched < page_size);
            let items = stream::iter(page.into_iter().map(Ok::<Customer, ReplicationError>));
            Ok(Some((items, next)))
        }
    })
    .try_flatten()
    .boxed()
}
