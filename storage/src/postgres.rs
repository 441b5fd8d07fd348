//! Persistent [`Storage`] implementation over PostgreSQL via `sqlx`.
//!
//! Each table is a physical Postgres table with an `id` primary key, a
//! `data` JSONB column holding the document body, and a `created_at`
//! timestamp mirrored from the document for indexing. Transactions use
//! `sqlx::Transaction`, obtained from the pool so it is `'static` and can be
//! held across the explicit `begin_transaction`/`commit`/`rollback` calls.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::Transaction;
use tokio::sync::Mutex;

use crate::Document;
use crate::Storage;
use crate::StorageError;
use crate::StorageResult;

/// Connection-pool configuration read from the environment, matching the
/// `DB_MAX_CONNECTIONS`/`DB_MIN_CONNECTIONS`/`DB_ACQUIRE_TIMEOUT_SECS`
/// convention used elsewhere in the platform.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let max_connections = std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(10);

    let min_connections = std::env::var("DB_MIN_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);

    let acquire_timeout_secs = std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(3);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .connect(database_url)
        .await
}

pub struct PostgresStorage {
    pool: PgPool,
    active_transaction: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PostgresStorage {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            active_transaction: Mutex::new(None),
        }
    }

    /// Creates the per-table row shape this implementation expects. Callers
    /// are responsible for running this (or an equivalent `sqlx::migrate!`
    /// migration set) once per table before first use.
    pub async fn ensure_table(&self, table: &str) -> StorageResult<()> {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (\n                id TEXT PRIMARY KEY,\n                created_at TIMESTAMPTZ,\n                data JSONB NOT NULL\n            )"
        );
        sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Fatal(err.to_string()))?;
        Ok(())
    }

    fn quote_table(table: &str) -> String {
        format!("\"{table}\"")
    }

    async fn with_executor<'q, F, Fut, T>(&'q self, run: F) -> StorageResult<T>
    where
        F: for<'e> FnOnce(&'e mut sqlx::PgConnection) -> Fut,
        Fut: std::future::Future<Output = sqlx::Result<T>>,
    {
        let mut guard = self.active_transaction.lock().await;
        if let Some(tx) = guard.as_mut() {
            run(tx).await.map_err(map_sqlx_err)
        } else {
            drop(guard);
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|err| StorageError::Transient(err.to_string()))?;
            run(&mut conn).await.map_err(map_sqlx_err)
        }
    }
}

fn map_sqlx_err(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StorageError::Transient(err.to_string()),
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("40001") => {
            StorageError::ConcurrencyConflict(err.to_string())
        }
        _ => StorageError::Fatal(err.to_string()),
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn save(&self, table: &str, id: &str, data: Document) -> StorageResult<()> {
        let created_at = data
            .get("created_at")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let statement = format!(
            "INSERT INTO {} (id, created_at, data) VALUES ($1, $2, $3)\n             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data",
            Self::quote_table(table)
        );
        let payload = serde_json::Value::Object(data);
        self.with_executor(|conn| async move {
            sqlx::query(&statement)
                .bind(id)
                .bind(created_at.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()))
                .bind(payload)
                .execute(conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn load(&self, table: &str, id: &str) -> StorageResult<Option<Document>> {
        let statement = format!("SELECT data FROM {} WHERE id = $1", Self::quote_table(table));
        let row = self
            .with_executor(|conn| async move {
                sqlx::query(&statement).bind(id).fetch_optional(conn).await
            })
            .await?;
        Ok(row.and_then(|row| {
            let value: serde_json::Value = row.get("data");
            value.as_object().cloned()
        }))
    }

    async fn load_all(&self, table: &str) -> StorageResult<Vec<Document>> {
        let statement = format!(
            "SELECT data FROM {} ORDER BY created_at NULLS LAST, id",
            Self::quote_table(table)
        );
        let rows = self
            .with_executor(|conn| async move { sqlx::query(&statement).fetch_all(conn).await })
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let value: serde_json::Value = row.get("data");
                value.as_object().cloned()
            })
            .collect())
    }

    async fn delete(&self, table: &str, id: &str) -> StorageResult<bool> {
        let statement = format!("DELETE FROM {} WHERE id = $1", Self::quote_table(table));
        let result = self
            .with_executor(|conn| async move { sqlx::query(&statement).bind(id).execute(conn).await })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, table: &str, id: &str) -> StorageResult<bool> {
        Ok(self.load(table, id).await?.is_some())
    }

    async fn find(&self, table: &str, filter: &Document) -> StorageResult<Vec<Document>> {
        // No secondary indexes on document fields: filter client-side after
        // a full table scan, matching the contract's "no joins" semantics.
        let all = self.load_all(table).await?;
        Ok(all
            .into_iter()
            .filter(|data| filter.iter().all(|(k, v)| data.get(k) == Some(v)))
            .collect())
    }

    async fn count(&self, table: &str) -> StorageResult<usize> {
        let statement = format!("SELECT COUNT(*) AS n FROM {}", Self::quote_table(table));
        let row = self
            .with_executor(|conn| async move { sqlx::query(&statement).fetch_one(conn).await })
            .await?;
        let n: i64 = row.get("n");
        Ok(n as usize)
    }

    async fn clear_table(&self, table: &str) -> StorageResult<()> {
        let statement = format!("DELETE FROM {}", Self::quote_table(table));
        self.with_executor(|conn| async move { sqlx::query(&statement).execute(conn).await })
            .await?;
        Ok(())
    }

    async fn begin_transaction(&self) -> StorageResult<()> {
        let mut guard = self.active_transaction.lock().await;
        if guard.is_some() {
            return Err(StorageError::Fatal(
                "a transaction is already in progress on this storage instance".into(),
            ));
        }
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StorageError::Transient(err.to_string()))?;
        *guard = Some(tx);
        Ok(())
    }

    async fn commit(&self) -> StorageResult<()> {
        let mut guard = self.active_transaction.lock().await;
        let tx = guard
            .take()
            .ok_or_else(|| StorageError::Fatal("no transaction in progress".into()))?;
        tx.commit().await.map_err(map_sqlx_err)
    }

    async fn rollback(&self) -> StorageResult<()> {
        let mut guard = self.active_transaction.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.rollback().await;
        }
        Ok(())
    }
}
