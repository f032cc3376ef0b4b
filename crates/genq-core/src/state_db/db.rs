//! SQLite-backed state database: connection, migration and time helper.
//! Key/value access lives in `kv`.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}?mode=rwc", out)
}

/// Handle to the shared state database.
///
/// Stored under the XDG state directory: `~/.local/state/genq/state.db`.
/// Cloning is cheap (the pool is shared), so every component gets its own handle.
#[derive(Clone)]
pub struct StateDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl StateDb {
    /// Open (or create) the default state database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("genq")?;
        Self::open_at(xdg_dirs.get_state_home().join("state.db")).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create state dir: {}", parent.display()))?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&path_to_sqlite_uri(path))
            .await
            .with_context(|| format!("open state db: {}", path.display()))?;
        let db = StateDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Close every pooled connection. Later queries on any clone fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        // Values are JSON documents; each key is read and written as a whole.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current wall-clock time as Unix milliseconds.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<StateDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = StateDb { pool };
    db.migrate().await?;
    Ok(db)
}
