//! Whole-value key/value operations. Each call is one SQL statement, so a
//! write replaces the stored document atomically.

use anyhow::Result;
use sqlx::Row;

use super::db::{unix_millis, StateDb};

impl StateDb {
    /// Read the raw value stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM kv
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    /// Insert or replace the value stored under `key`.
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE
            SET value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(unix_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete `key`. Returns whether a row was removed.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let r = sqlx::query(
            r#"
            DELETE FROM kv
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Delete `key` only if it still holds `expected`. Used to release a lease
    /// without clobbering one another instance wrote in the meantime.
    pub async fn remove_if(&self, key: &str, expected: &str) -> Result<bool> {
        let r = sqlx::query(
            r#"
            DELETE FROM kv
            WHERE key = ?1 AND value = ?2
            "#,
        )
        .bind(key)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }
}
