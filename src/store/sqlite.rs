// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed collections.
//!
//! Each collection is a table holding the record as a JSON document, plus the
//! identity id and creation timestamp as indexed columns for filtering and
//! ordering:
//!
//! ```text
//! id TEXT PRIMARY KEY | created_at INTEGER (unix nanos) | document TEXT
//! ```
//!
//! Timestamps are compared at full nanosecond precision, so a record created
//! in the same millisecond as the checkpoint is still found by
//! [`Filter::CreatedAfter`]. Instants outside 1677..2262 saturate.
//!
//! # SQLite Busy Handling
//!
//! Another process (the record generator, or a full reindex run) may hold the
//! database. SQLITE_BUSY/SQLITE_LOCKED is retried with exponential backoff
//! before being surfaced as a [`ReplicationError::Store`].

use super::{CollectionStore, Filter, FindOptions, SortOrder, StoreFuture};
use crate::error::{ReplicationError, Result};
use crate::record::{Customer, RecordId, RecordPatch};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "SQLite operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::store_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => {
                if is_sqlite_busy_error(&e) {
                    warn!(operation = operation_name, attempts, "SQLite busy, max retries exceeded");
                }
                return Err(e);
            }
        }
    }
}

/// Collection names become table names, so only plain identifiers are allowed.
pub fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn encode(record: &Customer) -> std::result::Result<String, sqlx::Error> {
    serde_json::to_string(record).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn decode(document: &str) -> std::result::Result<Customer, sqlx::Error> {
    serde_json::from_str(document).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Column value for `created_at`.
fn to_nanos(ts: &DateTime<Utc>) -> i64 {
    match ts.timestamp_nanos_opt() {
        Some(nanos) => nanos,
        None if ts.timestamp() < 0 => i64::MIN,
        None => i64::MAX,
    }
}

/// Positional binds shared by every filtered query:
/// `(? IS NULL OR created_at > ?) AND (? IS NULL OR id = ?)`.
fn filter_binds(filter: &Filter) -> (Option<i64>, Option<String>) {
    match filter {
        Filter::All => (None, None),
        Filter::CreatedAfter(ts) => (Some(to_nanos(ts)), None),
        Filter::Id(id) => (None, Some(id.as_str().to_string())),
    }
}

const FILTER_CLAUSE: &str = "(? IS NULL OR created_at > ?) AND (? IS NULL OR id = ?)";

/// A SQLite database holding one table per collection.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    url: String,
}

impl SqliteStore {
    /// Connect to the database at `url` (e.g. `sqlite://data/customers.db`),
    /// creating the file if it does not exist.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %url, "Connecting to SQLite store");

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| ReplicationError::Config(format!("Invalid store URL {}: {}", url, e)))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| ReplicationError::store("connect", e))?;

        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// Open (and create if needed) the table backing collection `name`.
    pub async fn collection(&self, name: &str) -> Result<SqliteCollection> {
        if !is_valid_collection_name(name) {
            return Err(ReplicationError::Config(format!(
                "Invalid collection name {:?} (letters, digits and '_' only)",
                name
            )));
        }

        let pool = &self.pool;
        let create_table = format!(
            r#"CREATE TABLE IF NOT EXISTS "{name}" (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                document TEXT NOT NULL
            )"#
        );
        let create_index =
            format!(r#"CREATE INDEX IF NOT EXISTS "{name}_created_at" ON "{name}" (created_at, id)"#);

        execute_with_retry("ensure_schema", || async {
            sqlx::query(&create_table).execute(pool).await?;
            sqlx::query(&create_index).execute(pool).await
        })
        .await
        .map_err(|e| ReplicationError::store("ensure_schema", e))?;

        debug!(collection = name, "Collection ready");
        Ok(SqliteCollection {
            pool: self.pool.clone(),
            name: name.to_string(),
        })
    }

    /// Store URL (for diagnostics).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Checkpoint the WAL and close the pool.
    pub async fn close(&self) {
        let pool = &self.pool;
        let result = execute_with_retry("wal_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
        })
        .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("SQLite store closed");
    }
}

/// One collection (table) of a [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct SqliteCollection {
    pool: SqlitePool,
    name: String,
}

impl CollectionStore for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, filter: Filter, options: FindOptions) -> StoreFuture<'_, Vec<Customer>> {
        Box::pin(async move {
            let direction = match options.sort {
                SortOrder::Ascending => "ASC",
                SortOrder::Descending => "DESC",
            };
            let sql = format!(
                r#"SELECT document FROM "{}" WHERE {} ORDER BY created_at {dir}, id {dir} LIMIT ? OFFSET ?"#,
                self.name,
                FILTER_CLAUSE,
                dir = direction
            );
            let (after, id) = filter_binds(&filter);
            // SQLite treats a negative LIMIT as "no limit".
            let limit = options.limit.map(|l| l as i64).unwrap_or(-1);
            let offset = options.skip as i64;
            let pool = &self.pool;

            let rows: Vec<(String,)> = execute_with_retry("find", || async {
                sqlx::query_as(&sql)
                    .bind(after)
                    .bind(after)
                    .bind(id.as_deref())
                    .bind(id.as_deref())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(pool)
                    .await
            })
            .await
            .map_err(|e| ReplicationError::store("find", e))?;

            rows.iter()
                .map(|(doc,)| decode(doc).map_err(|e| ReplicationError::store("find", e)))
                .collect()
        })
    }

    fn insert_many(&self, records: Vec<Customer>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            if records.is_empty() {
                return Ok(0);
            }

            let rows = records
                .iter()
                .map(|r| encode(r).map(|doc| (r.id.as_str().to_string(), to_nanos(&r.created_at), doc)))
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                .map_err(|e| ReplicationError::store("insert_many", e))?;

            let sql = format!(
                r#"INSERT INTO "{}" (id, created_at, document) VALUES (?, ?, ?) ON CONFLICT(id) DO NOTHING"#,
                self.name
            );
            let pool = &self.pool;
            let rows = &rows;

            let inserted = execute_with_retry("insert_many", || async {
                let mut tx = pool.begin().await?;
                let mut inserted = 0u64;
                for (id, created_at, doc) in rows {
                    inserted += sqlx::query(&sql)
                        .bind(id)
                        .bind(created_at)
                        .bind(doc)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }
                tx.commit().await?;
                Ok::<u64, sqlx::Error>(inserted)
            })
            .await
            .map_err(|e| ReplicationError::store("insert_many", e))?;

            if (inserted as usize) < records.len() {
                debug!(
                    collection = %self.name,
                    skipped = records.len() - inserted as usize,
                    "Skipped records already present"
                );
            }
            Ok(inserted as usize)
        })
    }

    fn update_one(&self, id: RecordId, patch: RecordPatch) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let select = format!(r#"SELECT document FROM "{}" WHERE id = ?"#, self.name);
            let update = format!(
                r#"UPDATE "{}" SET document = ?, created_at = ? WHERE id = ?"#,
                self.name
            );
            let pool = &self.pool;
            let id = &id;
            let patch = &patch;

            execute_with_retry("update_one", || async {
                let mut tx = pool.begin().await?;
                let row: Option<(String,)> = sqlx::query_as(&select)
                    .bind(id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
                let Some((doc,)) = row else {
                    return Ok::<bool, sqlx::Error>(false);
                };

                let mut record = decode(&doc)?;
                patch.apply_to(&mut record);
                sqlx::query(&update)
                    .bind(encode(&record)?)
                    .bind(to_nanos(&record.created_at))
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok::<bool, sqlx::Error>(true)
            })
            .await
            .map_err(|e| ReplicationError::store("update_one", e))
        })
    }

    fn count(&self, filter: Filter) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let sql = format!(r#"SELECT COUNT(*) FROM "{}" WHERE {}"#, self.name, FILTER_CLAUSE);
            let (after, id) = filter_binds(&filter);
            let pool = &self.pool;

            let (count,): (i64,) = execute_with_retry("count", || async {
                sqlx::query_as(&sql)
                    .bind(after)
                    .bind(after)
                    .bind(id.as_deref())
                    .bind(id.as_deref())
                    .fetch_one(pool)
                    .await
            })
            .await
            .map_err(|e| ReplicationError::store("count", e))?;

            Ok(count.max(0) as u64)
        })
    }
}
