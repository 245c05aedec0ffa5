//! Persistence for ConfScout: the libSQL response cache and the CSV dataset.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the enrichment cache and
//! the pipeline run history. The dataset itself is a plain CSV file handled by
//! [`dataset::DatasetFile`].
//!
//! **Access rules:**
//! - `confscout run`: read-write via [`Storage::open`]
//! - `confscout cache stats`: read-only via [`Storage::open_readonly`]
//!
//! Reads go straight to the connection. Writes are serialized through one async lock and
//! each write is a single statement, so concurrent writers never leave a half-written entry.

pub mod dataset;
mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use confscout_shared::{ConfScoutError, Result};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use uuid::Uuid;

pub use dataset::{Dataset, DatasetFile};

/// A cached extraction-service response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub model_id: String,
    pub value_json: String,
    pub created_at: DateTime<Utc>,
}

/// Cache size summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    /// Entry count per model, most used first.
    pub by_model: Vec<(String, u64)>,
}

/// One row of the run history.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub outcome: Option<String>,
    pub stats_json: Option<String>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfScoutError::io(parent, e))?;
        }

        let storage = Self::connect(path, false).await?;
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for inspection only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfScoutError::Storage(format!(
                "no cache database at {}",
                path.display()
            )));
        }
        Self::connect(path, true).await
    }

    async fn connect(path: &Path, readonly: bool) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly,
            write_lock: Mutex::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        ConfScoutError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ConfScoutError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Enrichment cache operations
    // -----------------------------------------------------------------------

    /// Look up a cached response by key.
    pub async fn get_cached(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT cache_key, model_id, value_json, created_at FROM enrichment_cache
                 WHERE cache_key = ?1",
                params![key],
            )
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let get = |idx: i32| {
                    row.get::<String>(idx)
                        .map_err(|e| ConfScoutError::Storage(e.to_string()))
                };
                let created_at = get(3)?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        ConfScoutError::Storage(format!("bad created_at {created_at:?}: {e}"))
                    })?;
                Ok(Some(CacheEntry {
                    key: get(0)?,
                    model_id: get(1)?,
                    value_json: get(2)?,
                    created_at,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(ConfScoutError::Storage(e.to_string())),
        }
    }

    /// Store a response under `key`, replacing any stale entry (upserts).
    pub async fn put_cached(&self, key: &str, model_id: &str, value_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO enrichment_cache (cache_key, model_id, value_json, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(cache_key) DO UPDATE SET
                   model_id = excluded.model_id,
                   value_json = excluded.value_json,
                   created_at = excluded.created_at",
                params![key, model_id, value_json, now.as_str()],
            )
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Drop every cached response. Returns how many were removed.
    pub async fn clear_cache(&self) -> Result<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute("DELETE FROM enrichment_cache", params![])
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT model_id, COUNT(*) FROM enrichment_cache
                 GROUP BY model_id ORDER BY COUNT(*) DESC, model_id",
                params![],
            )
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?;

        let mut stats = CacheStats::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?
        {
            let model: String = row
                .get(0)
                .map_err(|e| ConfScoutError::Storage(e.to_string()))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| ConfScoutError::Storage(e.to_string()))?;
            let count = u64::try_from(count).unwrap_or_default();
            stats.entries += count;
            stats.by_model.push((model, count));
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a pipeline run. Returns the generated run ID.
    pub async fn insert_run(&self) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (id, started_at) VALUES (?1, ?2)",
                params![id.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Close a run with its outcome and statistics.
    pub async fn finish_run(&self, run_id: &str, outcome: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "UPDATE pipeline_runs SET finished_at = ?1, outcome = ?2, stats_json = ?3
                 WHERE id = ?4",
                params![now.as_str(), outcome, stats_json, run_id],
            )
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, outcome, stats_json FROM pipeline_runs
                 ORDER BY started_at DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?;

        let mut runs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| ConfScoutError::Storage(e.to_string()))?
        {
            let map = |e: libsql::Error| ConfScoutError::Storage(e.to_string());
            runs.push(RunRecord {
                id: row.get(0).map_err(map)?,
                started_at: row.get(1).map_err(map)?,
                finished_at: row.get(2).map_err(map)?,
                outcome: row.get(3).map_err(map)?,
                stats_json: row.get(4).map_err(map)?,
            });
        }
        Ok(runs)
    }
}
