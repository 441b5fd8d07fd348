#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Table-oriented document storage with explicit transactions.
//!
//! `(table, id)` addresses a record whose body is an opaque JSON object.
//! Two reference implementations satisfy the [`Storage`] contract:
//! [`InMemoryStorage`] (a process-wide lock plus a shadow write-set for
//! true transactional rollback, intended for tests) and [`PostgresStorage`]
//! (a thin layer over `sqlx`'s Postgres transactions).

pub mod postgres;

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

pub use postgres::PostgresStorage;

/// An opaque, JSON-object-shaped document body.
pub type Document = serde_json::Map<String, serde_json::Value>;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {table}/{id}")]
    NotFound { table: String, id: String },
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("fatal storage failure: {0}")]
    Fatal(String),
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),
    #[error("tenant isolation violation: {0}")]
    TenantViolation(String),
}

impl StorageError {
    /// Whether a caller may usefully retry the operation that produced this
    /// error (transient failures and serialization conflicts only).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Transient(_) | StorageError::ConcurrencyConflict(_)
        )
    }
}

/// Document-oriented persistence partitioned into logical tables.
///
/// Every method is async so a single trait serves both the in-memory and
/// persistent-engine implementations. `begin_transaction`/`commit`/`rollback`
/// give explicit control for callers who cannot use [`atomic`]; `atomic`
/// itself is the sole supported way to compose multi-record updates.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(&self, table: &str, id: &str, data: Document) -> StorageResult<()>;

    async fn load(&self, table: &str, id: &str) -> StorageResult<Option<Document>>;

    /// Stable ordering: by the document's `created_at` field (if present and
    /// parseable as RFC 3339), then by insertion order.
    async fn load_all(&self, table: &str) -> StorageResult<Vec<Document>>;

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool>;

    async fn exists(&self, table: &str, id: &str) -> StorageResult<bool>;

    /// Equality match on top-level keys of `filter`; AND semantics; no joins.
    async fn find(&self, table: &str, filter: &Document) -> StorageResult<Vec<Document>>;

    async fn count(&self, table: &str) -> StorageResult<usize>;

    /// Administrative: removes every record in `table`. Rejected under a
    /// tenant scope by `TenantAwareStorage` before it ever reaches here.
    async fn clear_table(&self, table: &str) -> StorageResult<()>;

    async fn begin_transaction(&self) -> StorageResult<()>;

    async fn commit(&self) -> StorageResult<()>;

    async fn rollback(&self) -> StorageResult<()>;
}

/// Scoped transaction acquisition: opens a transaction on entry, commits on
/// `Ok`, rolls back on `Err`. The closure receives no transaction handle —
/// `storage` itself carries the active transaction internally — so callers
/// simply perform their `save`/`delete`/etc. calls against `storage` inside
/// the closure body.
pub async fn atomic<'a, S, F, Fut, T>(storage: &'a S, f: F) -> StorageResult<T>
where
    S: Storage + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = StorageResult<T>> + 'a,
{
    storage.begin_transaction().await?;
    match f().await {
        Ok(value) => {
            storage.commit().await?;
            Ok(value)
        }
        Err(err) => {
            // Best-effort rollback: if it also fails, the original error is
            // still the one that matters to the caller.
            let _ = storage.rollback().await;
            Err(err)
        }
    }
}

fn extract_created_at(data: &Document) -> Option<DateTime<Utc>> {
    data.get("created_at")
        .and_then(|value| value.as_str())
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Clone, Debug)]
struct StoredRecord {
    data: Document,
    seq: u64,
}

#[derive(Default)]
struct InMemoryState {
    tables: HashMap<String, HashMap<String, StoredRecord>>,
    next_seq: u64,
}

/// In-memory reference implementation. Holds one process-wide lock, so
/// `atomic` is a true serializable isolation boundary: a shadow copy of the
/// touched tables is taken on `begin_transaction` and restored verbatim on
/// `rollback`, giving the in-memory backend real rollback semantics rather
/// than silently leaving partial writes behind.
#[derive(Default)]
pub struct InMemoryStorage {
    state: RwLock<InMemoryState>,
    active_transaction: Mutex<Option<HashMap<String, HashMap<String, StoredRecord>>>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save(&self, table: &str, id: &str, data: Document) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), StoredRecord { data, seq });
        Ok(())
    }

    async fn load(&self, table: &str, id: &str) -> StorageResult<Option<Document>> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .map(|record| record.data.clone()))
    }

    async fn load_all(&self, table: &str) -> StorageResult<Vec<Document>> {
        let state = self.state.read().await;
        let mut records: Vec<&StoredRecord> = state
            .tables
            .get(table)
            .map(|rows| rows.values().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| {
            match (extract_created_at(&a.data), extract_created_at(&b.data)) {
                (Some(left), Some(right)) => left.cmp(&right).then(a.seq.cmp(&b.seq)),
                _ => a.seq.cmp(&b.seq),
            }
        });
        Ok(records.into_iter().map(|record| record.data.clone()).collect())
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .tables
            .get_mut(table)
            .map(|rows| rows.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn exists(&self, table: &str, id: &str) -> StorageResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .tables
            .get(table)
            .map(|rows| rows.contains_key(id))
            .unwrap_or(false))
    }

    async fn find(&self, table: &str, filter: &Document) -> StorageResult<Vec<Document>> {
        let all = self.load_all(table).await?;
        Ok(all
            .into_iter()
            .filter(|data| {
                filter
                    .iter()
                    .all(|(key, value)| data.get(key) == Some(value))
            })
            .collect())
    }

    async fn count(&self, table: &str) -> StorageResult<usize> {
        let state = self.state.read().await;
        Ok(state.tables.get(table).map(HashMap::len).unwrap_or(0))
    }

    async fn clear_table(&self, table: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.tables.remove(table);
        Ok(())
    }

    async fn begin_transaction(&self) -> StorageResult<()> {
        let mut slot = self.active_transaction.lock().await;
        if slot.is_some() {
            return Err(StorageError::Fatal(
                "a transaction is already in progress on this storage instance".into(),
            ));
        }
        let snapshot = self.state.read().await.tables.clone();
        *slot = Some(snapshot);
        Ok(())
    }

    async fn commit(&self) -> StorageResult<()> {
        let mut slot = self.active_transaction.lock().await;
        slot.take()
            .ok_or_else(|| StorageError::Fatal("no transaction in progress".into()))?;
        Ok(())
    }

    async fn rollback(&self) -> StorageResult<()> {
        let mut slot = self.active_transaction.lock().await;
        if let Some(snapshot) = slot.take() {
            let mut state = self.state.write().await;
            state.tables = snapshot;
        }
        Ok(())
    }
}
