//! Postgres-backed object store (feature `postgres`).
//!
//! Objects live in a single table keyed by object key:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS stepwise_objects (
//!     key        TEXT PRIMARY KEY,
//!     body       BYTEA NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! Calls block on the ambient tokio runtime handle, so they must come from a
//! thread that has entered a runtime but is not driving an async task
//! (`Handle::block_on` panics there). Async callers go through
//! `tokio::task::spawn_blocking`. Without any runtime every call fails with
//! `StoreError::Storage`.

use std::sync::Arc;

use sqlx::{PgPool, Row};

use super::object_store::{ObjectStore, StoreError};

pub struct PostgresObjectStore {
    pool: Arc<PgPool>,
}

impl PostgresObjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    fn handle() -> Result<tokio::runtime::Handle, StoreError> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| StoreError::Storage(format!("no tokio runtime: {e}")))
    }
}

impl ObjectStore for PostgresObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let handle = Self::handle()?;
        let pool = self.pool.clone();
        let key = key.to_string();

        handle.block_on(async move {
            let row = sqlx::query(
                r#"
                SELECT body
                FROM stepwise_objects
                WHERE key = $1
                "#,
            )
            .bind(&key)
            .fetch_optional(&*pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

            match row {
                Some(row) => row
                    .try_get::<Vec<u8>, _>("body")
                    .map(Some)
                    .map_err(|e| StoreError::Storage(e.to_string())),
                None => Ok(None),
            }
        })
    }

    fn put(&self, key: &str, body: &[u8]) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        let handle = Self::handle()?;
        let pool = self.pool.clone();
        let key = key.to_string();
        let body = body.to_vec();

        handle.block_on(async move {
            sqlx::query(
                r#"
                INSERT INTO stepwise_objects (key, body)
                VALUES ($1, $2)
                ON CONFLICT (key)
                DO UPDATE SET
                    body = EXCLUDED.body,
                    updated_at = NOW()
                "#,
            )
            .bind(&key)
            .bind(&body)
            .execute(&*pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Storage(e.to_string()))
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let handle = Self::handle()?;
        let pool = self.pool.clone();
        let pattern = format!(
            "{}%",
            prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );

        handle.block_on(async move {
            let rows = sqlx::query(
                r#"
                SELECT key
                FROM stepwise_objects
                WHERE key LIKE $1
                ORDER BY key
                "#,
            )
            .bind(&pattern)
            .fetch_all(&*pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

            rows.iter()
                .map(|row| {
                    row.try_get::<String, _>("key")
                        .map_err(|e| StoreError::Storage(e.to_string()))
                })
                .collect()
        })
    }
}
