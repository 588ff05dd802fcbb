//! kube-events persistence: SQLite-backed record sink.
//! One `records` table partitioned by a `collection` column.

#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kevents_core::{Record, ResourceKind, RESOURCE_CREATED};
use kevents_store::{RecordSink, SinkError};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info};

/// Collections where a resource may be recorded as created only once.
pub const UNIQUE_CREATED_COLLECTIONS: &[ResourceKind] = &[
    ResourceKind::Deployment,
    ResourceKind::ResourceQuota,
    ResourceKind::Ingress,
    ResourceKind::Service,
    ResourceKind::PersistentVolumeClaim,
    ResourceKind::Secret,
    ResourceKind::ConfigMap,
];

pub struct SqliteSink {
    db: Arc<Mutex<Option<Connection>>>,
    path: String,
}

impl SqliteSink {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("KEVENTS_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = Instant::now();
        if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        init_schema(&db)?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        info!(path, "record sink opened");
        Ok(Self { db: Arc::new(Mutex::new(Some(db))), path: path.to_string() })
    }

    pub fn path(&self) -> &str { &self.path }

    /// Stored rows in `collection`.
    pub async fn count(&self, collection: &str) -> Result<u64, SinkError> {
        let collection = collection.to_string();
        self.with_conn("count", move |conn| {
            conn.query_row("SELECT COUNT(*) FROM records WHERE collection = ?1", [collection], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T, SinkError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock();
            let conn = guard.as_mut().ok_or(SinkError::Closed)?;
            f(conn).map_err(|e| SinkError::backend(op, e))
        })
        .await
        .map_err(|e| SinkError::Worker(e.to_string()))?
    }
}

fn init_schema(db: &Connection) -> Result<()> {
    db.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id                 INTEGER PRIMARY KEY,
            collection         TEXT NOT NULL,
            ts                 INTEGER NOT NULL,
            severity           TEXT NOT NULL,
            name               TEXT NOT NULL,
            resource_name      TEXT NOT NULL,
            resource_namespace TEXT NOT NULL,
            resource_uid       TEXT NOT NULL,
            resource_type      TEXT NOT NULL,
            message            TEXT NOT NULL,
            details            TEXT NOT NULL
        )",
        [],
    )
    .context("creating records table")?;

    let created_in = UNIQUE_CREATED_COLLECTIONS
        .iter()
        .map(|k| format!("'{}'", k.collection()))
        .collect::<Vec<_>>()
        .join(", ");
    let events = ResourceKind::Event.collection();
    let indexes = [
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS unique_resource_added ON records(collection, resource_uid)
             WHERE name = '{RESOURCE_CREATED}' AND collection IN ({created_in})"
        ),
        // Watch failure records carry no uid.
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS unique_event_uid ON records(resource_uid)
             WHERE collection = '{events}' AND resource_uid != ''"
        ),
        "CREATE INDEX IF NOT EXISTS idx_records_ts ON records(ts)".to_string(),
        "CREATE INDEX IF NOT EXISTS idx_records_type_name_ns
             ON records(collection, resource_type, resource_name, resource_namespace)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_records_name_ns ON records(collection, resource_name, resource_namespace)"
            .to_string(),
    ];
    for sql in &indexes {
        db.execute(sql, []).with_context(|| format!("creating index: {sql}"))?;
    }
    Ok(())
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn bulk_insert(&self, records: Vec<Record>, collection: &str) -> Result<(), SinkError> {
        let started = Instant::now();
        let total = records.len();
        let owned = collection.to_string();
        let inserted = self
            .with_conn("insert", move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0usize;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT OR IGNORE INTO records(collection, ts, severity, name, resource_name,
                             resource_namespace, resource_uid, resource_type, message, details)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    )?;
                    for r in &records {
                        let details = serde_json::to_string(&r.details).unwrap_or_else(|_| "{}".to_string());
                        inserted += stmt.execute(params![
                            owned,
                            r.time.timestamp_millis(),
                            r.severity.as_str(),
                            r.name,
                            r.resource_name,
                            r.resource_namespace,
                            r.resource_uid,
                            r.resource_type.as_str(),
                            r.message,
                            details,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        histogram!("persist_insert_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_inserted_total", inserted as u64, "collection" => collection.to_string());
        if inserted < total {
            debug!(collection, skipped = total - inserted, "duplicate records skipped");
        }
        Ok(())
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64, SinkError> {
        let started = Instant::now();
        let cutoff = older_than.timestamp_millis();
        let removed = self
            .with_conn("cleanup", move |conn| conn.execute("DELETE FROM records WHERE ts <= ?1", [cutoff]))
            .await?;
        histogram!("persist_cleanup_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(removed as u64)
    }

    async fn close(&self) -> Result<(), SinkError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || match db.lock().take() {
            Some(conn) => conn.close().map_err(|(_, e)| SinkError::backend("close", e)),
            None => Ok(()),
        })
        .await
        .map_err(|e| SinkError::Worker(e.to_string()))?
    }
}

pub fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".kevents");
        p.push("events.db");
        return p.to_string_lossy().to_string();
    }
    "events.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kevents_core::{ResourceType, Severity, RESOURCE_ERROR, RESOURCE_MODIFIED};

    fn temp_sink() -> (tempfile::TempDir, SqliteSink) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.db");
        let sink = SqliteSink::open(path.to_str().unwrap()).unwrap();
        (dir, sink)
    }

    fn record(source: ResourceKind, name: &str, uid: &str, time: DateTime<Utc>) -> Record {
        Record {
            time,
            severity: Severity::Info,
            name: name.into(),
            resource_name: "web".into(),
            resource_namespace: "prod".into(),
            resource_uid: uid.into(),
            resource_type: ResourceType::Deployment,
            message: String::new(),
            details: [("container".to_string(), "app".to_string())].into_iter().collect(),
            source,
        }
    }

    #[tokio::test]
    async fn duplicate_created_is_skipped_but_batch_lands() {
        let (_dir, sink) = temp_sink();
        let now = Utc::now();
        let batch = vec![
            record(ResourceKind::Deployment, RESOURCE_CREATED, "d-1", now),
            record(ResourceKind::Deployment, RESOURCE_CREATED, "d-1", now),
            record(ResourceKind::Deployment, RESOURCE_MODIFIED, "d-1", now),
            record(ResourceKind::Deployment, RESOURCE_MODIFIED, "d-1", now),
        ];
        sink.bulk_insert(batch, "deployments").await.unwrap();
        assert_eq!(sink.count("deployments").await.unwrap(), 3);

        // Nodes are not covered by the created-once rule.
        let nodes = vec![
            record(ResourceKind::Node, RESOURCE_CREATED, "n-1", now),
            record(ResourceKind::Node, RESOURCE_CREATED, "n-1", now),
        ];
        sink.bulk_insert(nodes, "nodes").await.unwrap();
        assert_eq!(sink.count("nodes").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn events_are_unique_by_uid() {
        let (_dir, sink) = temp_sink();
        let now = Utc::now();
        let batch = vec![
            record(ResourceKind::Event, "PodFailed", "ev-1", now),
            record(ResourceKind::Event, "PodFailed", "ev-1", now),
            record(ResourceKind::Event, "Pulled", "ev-2", now),
        ];
        sink.bulk_insert(batch, "events").await.unwrap();
        assert_eq!(sink.count("events").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn uidless_event_errors_are_all_kept() {
        let (_dir, sink) = temp_sink();
        let now = Utc::now();
        let failure = || Record { severity: Severity::Error, ..record(ResourceKind::Event, RESOURCE_ERROR, "", now) };
        sink.bulk_insert(vec![failure(), failure()], "events").await.unwrap();
        assert_eq!(sink.count("events").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cleanup_removes_at_or_before_cutoff() {
        let (_dir, sink) = temp_sink();
        let t = Utc::now();
        let batch = vec![
            record(ResourceKind::Event, "A", "old", t - chrono::Duration::hours(25)),
            record(ResourceKind::Event, "B", "young", t - chrono::Duration::hours(23)),
        ];
        sink.bulk_insert(batch, "events").await.unwrap();
        let cutoff = t - chrono::Duration::hours(24);
        assert_eq!(sink.cleanup(cutoff).await.unwrap(), 1);
        assert_eq!(sink.cleanup(cutoff).await.unwrap(), 0);
        assert_eq!(sink.count("events").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn closed_sink_refuses_work() {
        let (_dir, sink) = temp_sink();
        sink.close().await.unwrap();
        sink.close().await.unwrap();
        let err = sink.bulk_insert(vec![record(ResourceKind::Node, "x", "n", Utc::now())], "nodes").await.unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }

    #[tokio::test]
    async fn reopen_keeps_rows_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let path = path.to_str().unwrap();
        {
            let sink = SqliteSink::open(path).unwrap();
            sink.bulk_insert(vec![record(ResourceKind::Secret, RESOURCE_CREATED, "s", Utc::now())], "secrets").await.unwrap();
            sink.close().await.unwrap();
        }
        let sink = SqliteSink::open(path).unwrap();
        sink.bulk_insert(vec![record(ResourceKind::Secret, RESOURCE_CREATED, "s", Utc::now())], "secrets").await.unwrap();
        assert_eq!(sink.count("secrets").await.unwrap(), 1);
    }
}
