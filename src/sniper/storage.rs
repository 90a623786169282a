//! Persistence of the portfolio snapshot.
//!
//! The whole snapshot is one document rewritten after every mutation. Two
//! backends are provided: a JSON file replaced atomically, and a single-row
//! SQLite table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::types::PortfolioSnapshot;

/// Contract for snapshot persistence.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Replace the stored snapshot.
    async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()>;

    /// Last stored snapshot, if any.
    async fn load_snapshot(&self) -> Result<Option<PortfolioSnapshot>>;
}

/// JSON document on disk, written to a temp file then renamed into place so
/// readers never observe a partial write.
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "stats".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StatsStore for JsonSnapshotStore {
    async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let document = serde_json::to_string_pretty(snapshot)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, document)
            .await
            .with_context(|| format!("writing {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;

        debug!(path = %self.path.display(), "Snapshot saved");
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<PortfolioSnapshot>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.path.display())),
        };
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("parsing snapshot {}", self.path.display()))?;
        Ok(Some(snapshot))
    }
}

#[derive(FromRow)]
struct SnapshotRow {
    document: String,
}

/// SQLite table holding exactly one row with the serialized snapshot.
pub struct SqliteStatsStore {
    pool: Pool<Sqlite>,
}

impl SqliteStatsStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        Self::connect(&url, 5).await
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to SQLite database")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolio_snapshot (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                document TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create portfolio_snapshot table")?;

        info!(url = %database_url, "SQLite stats store ready");
        Ok(Arc::new(Self { pool }))
    }
}

#[async_trait]
impl StatsStore for SqliteStatsStore {
    async fn save_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        let document = serde_json::to_string(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO portfolio_snapshot (id, document, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(document)
        .bind(snapshot.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to upsert portfolio snapshot")?;

        debug!("Snapshot saved");
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<PortfolioSnapshot>> {
        let row: Option<SnapshotRow> =
            sqlx::query_as("SELECT document FROM portfolio_snapshot WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read portfolio snapshot")?;

        row.map(|r| serde_json::from_str(&r.document).context("Failed to decode snapshot"))
            .transpose()
    }
}
