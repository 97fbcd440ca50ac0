//! Embedded SQLite engine behind a shared/exclusive gate.
//!
//! Mutations run on a single writer connection while holding the gate
//! exclusively. Queries hold the gate shared and run on a bounded pool of
//! read-only connections, so a query never observes a half-applied batch.
//! All calls run in `spawn_blocking`.

use crate::render;
use common::{StoreError, StoreResult};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Batch, Connection, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Read connections kept by default.
pub const DEFAULT_READ_POOL_SIZE: u32 = 8;

/// Handle to the local engine file. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    path: PathBuf,
    writer: Mutex<Option<Connection>>,
    /// `None` once closed. Held exclusively while applying a mutation.
    gate: RwLock<Option<Pool<SqliteConnectionManager>>>,
    closed: AtomicBool,
}

impl Engine {
    /// Create an empty engine at `path`.
    ///
    /// The engine file only ever holds state derived from the replicated log,
    /// so any existing file (and its WAL sidecars) is discarded first.
    pub async fn open(path: impl AsRef<Path>, read_pool_size: u32) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_blocking(path, read_pool_size))
            .await
            .map_err(|e| StoreError::Io(format!("engine open task failed: {e}")))?
    }

    fn open_blocking(path: PathBuf, read_pool_size: u32) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        for stale in [path.clone(), sidecar(&path, "-wal"), sidecar(&path, "-shm")] {
            match fs::remove_file(&stale) {
                Ok(()) => debug!(path = %stale.display(), "removed stale engine file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let writer = Connection::open(&path).map_err(io_error)?;
        writer
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(io_error)?;

        let manager = SqliteConnectionManager::file(&path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let readers = Pool::builder()
            .max_size(read_pool_size.max(1))
            .min_idle(Some(0))
            .build(manager)
            .map_err(io_error)?;

        debug!(path = %path.display(), read_pool_size, "opened engine");
        Ok(Self {
            inner: Arc::new(EngineInner {
                path,
                writer: Mutex::new(Some(writer)),
                gate: RwLock::new(Some(readers)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Run mutation text to completion under the exclusive gate.
    ///
    /// The text is executed as a batch, so several `;`-separated statements
    /// all run.
    pub async fn execute(&self, sql: impl Into<String>) -> StoreResult<()> {
        let sql = sql.into();
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let gate = inner.gate.blocking_write();
            if gate.is_none() {
                return Err(StoreError::Closed);
            }
            let writer = inner.writer.blocking_lock();
            let conn = writer.as_ref().ok_or(StoreError::Closed)?;
            conn.execute_batch(&sql).map_err(StoreError::execution)
        })
        .await
        .map_err(|e| StoreError::Io(format!("engine task failed: {e}")))?
    }

    /// Run a query under the shared gate and render every row.
    ///
    /// Text holding several statements runs each of them in order; the
    /// rendering is that of the last one.
    pub async fn query(&self, sql: impl Into<String>) -> StoreResult<String> {
        let sql = sql.into();
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let gate = inner.gate.blocking_read();
            let readers = gate.as_ref().ok_or(StoreError::Closed)?;
            let conn = readers.get().map_err(io_error)?;

            let mut batch = Batch::new(&conn, &sql);
            let mut out = String::new();
            while let Some(mut stmt) = batch.next().map_err(StoreError::execution)? {
                out.clear();
                let columns = stmt.column_count();
                let mut rows = stmt.query([]).map_err(StoreError::execution)?;
                while let Some(row) = rows.next().map_err(StoreError::execution)? {
                    let values = (0..columns)
                        .map(|i| row.get_ref(i))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(StoreError::execution)?;
                    render::write_row(&mut out, values);
                }
            }
            Ok(out)
        })
        .await
        .map_err(|e| StoreError::Io(format!("engine task failed: {e}")))?
    }

    /// Drop every connection. Later calls fail with [`StoreError::Closed`].
    ///
    /// Waits for an in-flight mutation or query to finish.
    pub async fn close(&self) {
        let inner = self.inner.clone();
        let closed = tokio::task::spawn_blocking(move || {
            let mut gate = inner.gate.blocking_write();
            let pool = gate.take();
            inner.writer.blocking_lock().take();
            inner.closed.store(true, Ordering::Release);
            pool.is_some()
        })
        .await;
        if let Ok(true) = closed {
            debug!(path = %self.inner.path.display(), "closed engine");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn io_error(err: impl std::fmt::Display) -> StoreError {
    StoreError::Io(err.to_string())
}
