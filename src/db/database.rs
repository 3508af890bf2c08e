use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_rusqlite::Connection;

use crate::changes::ChangeRouter;
use crate::collection::Collection;
use crate::db::sanitize::{quote_ident, validate_collection_name};
use crate::error::{Error, Result};
use crate::options::DatabaseOptions;

/// The shared change-log table, ordered across all collections by `seq`.
pub const CHANGE_LOG_TABLE: &str = "__mongolite_changes__";

const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -64000;
PRAGMA temp_store = MEMORY;
"#;

const BOOTSTRAP: &str = r#"
CREATE TABLE IF NOT EXISTS "__mongolite_changes__" (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    op TEXT NOT NULL,
    doc_id TEXT NOT NULL,
    before_json TEXT,
    after_json TEXT,
    ts INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_mongolite_changes_collection
    ON "__mongolite_changes__"(collection);
"#;

/// Handle to one SQLite-backed document database. Cheap to clone; all
/// clones share the connection, the lazily-created-table cache, and the
/// change poller.
#[derive(Clone)]
pub struct Database {
  pub(crate) inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
  pub(crate) conn: Connection,
  pub(crate) options: DatabaseOptions,
  pub(crate) router: ChangeRouter,
  closed: AtomicBool,
  tables: Mutex<HashSet<String>>,
}

impl Database {
  /// Open a database by path, or in memory with `":memory:"`.
  pub async fn connect(path: &str) -> Result<Database> {
    Self::connect_with(path, DatabaseOptions::default()).await
  }

  pub async fn connect_with(path: &str, options: DatabaseOptions) -> Result<Database> {
    let conn = if path == ":memory:" {
      Connection::open_in_memory().await?
    } else {
      Connection::open(path).await?
    };

    // Pragmas plus the idempotent change-log bootstrap.
    conn
      .call(|conn| {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(BOOTSTRAP).map_err(|e| e.into())
      })
      .await?;

    tracing::info!(path, "database opened");
    Ok(Database {
      inner: Arc::new(DatabaseInner {
        conn,
        options,
        router: ChangeRouter::new(),
        closed: AtomicBool::new(false),
        tables: Mutex::new(HashSet::new()),
      }),
    })
  }

  pub async fn open_in_memory() -> Result<Database> {
    Self::connect(":memory:").await
  }

  /// Get a handle to a named collection. The backing table is created
  /// lazily on first use.
  pub fn collection(&self, name: &str) -> Collection {
    Collection::new(self.clone(), name)
  }

  pub async fn list_collections(&self) -> Result<Vec<String>> {
    self.guard()?;
    self
      .inner
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT name FROM sqlite_master WHERE type = 'table' \
           AND name NOT LIKE 'sqlite_%' AND name <> '__mongolite_changes__' \
           ORDER BY name",
        )?;
        let mut rows = stmt.query([])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
          names.push(row.get(0)?);
        }
        Ok(names)
      })
      .await
      .map_err(Error::from)
  }

  /// Close the handle: detach the poller, end every change stream, and
  /// release the connection. Idempotent; later operations fail with
  /// `NotConnected`.
  pub async fn close(&self) -> Result<()> {
    if self.inner.closed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    self.inner.router.shutdown();
    tracing::info!("database closed");
    self.inner.conn.clone().close().await.map_err(Error::from)
  }

  pub(crate) fn guard(&self) -> Result<()> {
    if self.inner.closed.load(Ordering::SeqCst) {
      return Err(Error::NotConnected);
    }
    Ok(())
  }

  /// Create the collection table if this handle has not seen it yet.
  pub(crate) async fn ensure_collection(&self, name: &str) -> Result<()> {
    self.guard()?;
    if self.inner.tables.lock().contains(name) {
      return Ok(());
    }
    validate_collection_name(name)?;
    let ddl = format!(
      "CREATE TABLE IF NOT EXISTS {} (_id TEXT PRIMARY KEY, data TEXT NOT NULL)",
      quote_ident(name)
    );
    self
      .inner
      .conn
      .call(move |conn| conn.execute_batch(&ddl).map_err(|e| e.into()))
      .await?;
    self.inner.tables.lock().insert(name.to_string());
    Ok(())
  }

  pub(crate) fn forget_collection(&self, name: &str) {
    self.inner.tables.lock().remove(name);
  }
}
