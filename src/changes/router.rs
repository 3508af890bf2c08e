use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tokio::task::JoinHandle;
use tokio_rusqlite::Connection;

use crate::changes::stream::{ChangeStream, SubscriberQueue};
use crate::db::sanitize::quote_ident;
use crate::db::{Database, CHANGE_LOG_TABLE};
use crate::error::Result;
use crate::options::{ChangeStreamOptions, FullDocumentMode};
use crate::query::FilterCompiler;
use crate::types::{
  ChangeEvent, Document, DocumentKey, Filter, OperationType, UpdateDescription,
};

struct Subscriber {
  id: u64,
  collection: String,
  /// Pre-compiled per-row match condition: post-image for inserts/updates,
  /// before-image for deletes.
  match_filter: Option<(String, Vec<SqlValue>)>,
  mode: FullDocumentMode,
  queue: Arc<SubscriberQueue>,
  /// Highest seq considered for this subscription; drives change-log GC.
  last_seen: AtomicI64,
}

/// Shared fan-out state: one per database handle. Owns the subscriber
/// registry and the single poller task.
pub(crate) struct ChangeRouter {
  subscribers: Arc<RwLock<HashMap<u64, Arc<Subscriber>>>>,
  next_id: AtomicU64,
  poller: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeRouter {
  pub(crate) fn new() -> Self {
    Self {
      subscribers: Arc::new(RwLock::new(HashMap::new())),
      next_id: AtomicU64::new(1),
      poller: Mutex::new(None),
    }
  }

  pub(crate) async fn subscribe(
    &self,
    db: &Database,
    collection: &str,
    options: ChangeStreamOptions,
  ) -> Result<ChangeStream> {
    let match_filter = match &options.filter {
      None => None,
      Some(raw) => {
        let tree = Filter::parse(raw)?;
        if matches!(tree, Filter::All) {
          None
        } else {
          let after = FilterCompiler::new("after_json", "doc_id").compile(&tree)?;
          let before = FilterCompiler::new("before_json", "doc_id").compile(&tree)?;
          let sql = format!(
            "((op != 'D' AND {}) OR (op = 'D' AND {}))",
            after.sql, before.sql
          );
          let mut params = after.params;
          params.extend(before.params);
          Some((sql, params))
        }
      }
    };

    // Install capture triggers and read the current high-water mark; the
    // stream sees only changes after this point.
    let coll = collection.to_string();
    let last_seq = db
      .inner
      .conn
      .call(move |conn| {
        install_triggers(conn, &coll)?;
        let seq: i64 = conn.query_row(
          &format!(
            "SELECT COALESCE(MAX(seq), 0) FROM {}",
            quote_ident(CHANGE_LOG_TABLE)
          ),
          [],
          |row| row.get(0),
        )?;
        Ok(seq)
      })
      .await?;

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let subscriber = Arc::new(Subscriber {
      id,
      collection: collection.to_string(),
      match_filter,
      mode: options.full_document,
      queue: Arc::new(SubscriberQueue::new(db.inner.options.queue_capacity)),
      last_seen: AtomicI64::new(last_seq),
    });
    self
      .subscribers
      .write()
      .insert(id, Arc::clone(&subscriber));

    {
      let mut poller = self.poller.lock();
      if poller.is_none() {
        *poller = Some(self.spawn_poller(db, last_seq));
      }
    }

    tracing::debug!(collection, id, "change stream subscribed");
    Ok(ChangeStream::new(
      db.clone(),
      collection.to_string(),
      id,
      subscriber.queue.clone(),
    ))
  }

  pub(crate) fn unsubscribe(&self, id: u64) {
    if let Some(subscriber) = self.subscribers.write().remove(&id) {
      subscriber.queue.close();
      tracing::debug!(id, "change stream unsubscribed");
    }
  }

  /// Abort the poller and end every stream. Called from `Database::close`.
  pub(crate) fn shutdown(&self) {
    if let Some(handle) = self.poller.lock().take() {
      handle.abort();
    }
    let mut subscribers = self.subscribers.write();
    for (_, subscriber) in subscribers.drain() {
      subscriber.queue.close();
    }
  }

  pub(crate) fn min_last_seen(&self) -> Option<i64> {
    self
      .subscribers
      .read()
      .values()
      .map(|s| s.last_seen.load(Ordering::Relaxed))
      .min()
  }

  pub(crate) fn has_subscribers_for(&self, collection: &str) -> bool {
    self
      .subscribers
      .read()
      .values()
      .any(|s| s.collection == collection)
  }

  fn spawn_poller(&self, db: &Database, start_seq: i64) -> JoinHandle<()> {
    let conn = db.inner.conn.clone();
    let subscribers = Arc::clone(&self.subscribers);
    let interval = db.inner.options.poll_interval;
    let batch = db.inner.options.fetch_batch;
    tokio::spawn(async move {
      let mut last_polled = start_seq;
      loop {
        tokio::time::sleep(interval).await;
        let subs: Vec<Arc<Subscriber>> = subscribers.read().values().cloned().collect();
        if subs.is_empty() {
          continue;
        }
        match poll_once(&conn, &subs, last_polled, batch).await {
          Ok(Some(new_last)) => last_polled = new_last,
          Ok(None) => {}
          Err(e) => tracing::warn!(error = %e, "change poll failed; retrying next tick"),
        }
      }
    })
  }
}

struct ChangeRow {
  seq: i64,
  collection: String,
  op: String,
  doc_id: String,
  before_json: Option<String>,
  after_json: Option<String>,
  ts: i64,
}

/// One poll tick: fetch new log rows, evaluate subscriber filters against
/// the captured images, refetch current documents for update-lookup
/// subscribers, then fan out in seq order.
async fn poll_once(
  conn: &Connection,
  subs: &[Arc<Subscriber>],
  after_seq: i64,
  batch: usize,
) -> Result<Option<i64>> {
  let filter_subs: Vec<(u64, String, String, Vec<SqlValue>)> = subs
    .iter()
    .filter_map(|s| {
      s.match_filter
        .as_ref()
        .map(|(sql, params)| (s.id, s.collection.clone(), sql.clone(), params.clone()))
    })
    .collect();
  let lookup_collections: HashSet<String> = subs
    .iter()
    .filter(|s| s.mode == FullDocumentMode::UpdateLookup)
    .map(|s| s.collection.clone())
    .collect();

  let batch = batch as i64;
  let (rows, matches, lookups) = conn
    .call(move |conn| {
      let log = quote_ident(CHANGE_LOG_TABLE);
      let mut rows = Vec::new();
      {
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT seq, collection, op, doc_id, before_json, after_json, ts \
           FROM {log} WHERE seq > ? ORDER BY seq ASC LIMIT ?"
        ))?;
        let mut fetched = stmt.query(params![after_seq, batch])?;
        while let Some(row) = fetched.next()? {
          rows.push(ChangeRow {
            seq: row.get(0)?,
            collection: row.get(1)?,
            op: row.get(2)?,
            doc_id: row.get(3)?,
            before_json: row.get(4)?,
            after_json: row.get(5)?,
            ts: row.get(6)?,
          });
        }
      }

      let mut matches: HashMap<u64, HashSet<i64>> = HashMap::new();
      if let Some(max_seq) = rows.last().map(|r| r.seq) {
        for (id, collection, sql, params) in &filter_subs {
          let mut stmt = conn.prepare(&format!(
            "SELECT seq FROM {log} WHERE seq > ? AND seq <= ? AND collection = ? AND {sql}"
          ))?;
          let mut bound = vec![
            SqlValue::Integer(after_seq),
            SqlValue::Integer(max_seq),
            SqlValue::Text(collection.clone()),
          ];
          bound.extend(params.iter().cloned());
          let mut matched = stmt.query(params_from_iter(bound))?;
          let set = matches.entry(*id).or_default();
          while let Some(row) = matched.next()? {
            set.insert(row.get(0)?);
          }
        }
      }

      let mut lookups: HashMap<(String, String), Option<String>> = HashMap::new();
      for row in &rows {
        if row.op != OperationType::Update.code() || !lookup_collections.contains(&row.collection) {
          continue;
        }
        let key = (row.collection.clone(), row.doc_id.clone());
        if lookups.contains_key(&key) {
          continue;
        }
        let mut stmt = conn.prepare_cached(&format!(
          "SELECT data FROM {} WHERE _id = ?1",
          quote_ident(&row.collection)
        ))?;
        let data = stmt
          .query_row(params![row.doc_id], |r| r.get::<_, String>(0))
          .optional()?;
        lookups.insert(key, data);
      }

      Ok((rows, matches, lookups))
    })
    .await?;

  let Some(new_last) = rows.last().map(|r| r.seq) else {
    return Ok(None);
  };

  for row in &rows {
    let Some(op) = OperationType::from_code(&row.op) else {
      tracing::warn!(op = %row.op, seq = row.seq, "unknown change op; skipping");
      continue;
    };
    for sub in subs {
      if sub.collection != row.collection || row.seq <= sub.last_seen.load(Ordering::Relaxed) {
        continue;
      }
      let selected = match &sub.match_filter {
        Some(_) => matches
          .get(&sub.id)
          .is_some_and(|set| set.contains(&row.seq)),
        None => true,
      };
      if selected {
        sub.queue.push(build_event(row, op, sub.mode, &lookups));
      }
      sub.last_seen.store(row.seq, Ordering::Relaxed);
    }
  }
  tracing::debug!(count = rows.len(), last = new_last, "change batch delivered");
  Ok(Some(new_last))
}

fn build_event(
  row: &ChangeRow,
  op: OperationType,
  mode: FullDocumentMode,
  lookups: &HashMap<(String, String), Option<String>>,
) -> ChangeEvent {
  let before: Option<Document> = row
    .before_json
    .as_deref()
    .and_then(|s| serde_json::from_str(s).ok());
  let after: Option<Document> = row
    .after_json
    .as_deref()
    .and_then(|s| serde_json::from_str(s).ok());

  let full_document = match op {
    OperationType::Insert => after.clone(),
    OperationType::Update => match mode {
      FullDocumentMode::Default => after.clone(),
      FullDocumentMode::UpdateLookup => lookups
        .get(&(row.collection.clone(), row.doc_id.clone()))
        .and_then(|data| data.as_deref())
        .and_then(|s| serde_json::from_str(s).ok()),
    },
    OperationType::Delete => None,
  };
  let full_document_before_change = match op {
    OperationType::Insert => None,
    OperationType::Update | OperationType::Delete => before.clone(),
  };
  let update_description = match (op, &before, &after) {
    (OperationType::Update, Some(before), Some(after)) => {
      Some(UpdateDescription::between(before, after))
    }
    _ => None,
  };

  ChangeEvent {
    operation_type: op,
    collection: row.collection.clone(),
    document_key: DocumentKey {
      id: row.doc_id.clone(),
    },
    full_document,
    full_document_before_change,
    update_description,
    seq: row.seq,
    changed_at: DateTime::from_timestamp(row.ts, 0).unwrap_or_else(Utc::now),
  }
}

/// Install the three AFTER triggers for a collection, checking the
/// catalogue first so reinstallation is a no-op.
fn install_triggers(conn: &rusqlite::Connection, collection: &str) -> rusqlite::Result<()> {
  let table = quote_ident(collection);
  let log = quote_ident(CHANGE_LOG_TABLE);
  let ts = "CAST(strftime('%s','now') AS INTEGER)";

  let insert_name = format!("{collection}_insert_trigger");
  let update_name = format!("{collection}_update_trigger");
  let delete_name = format!("{collection}_delete_trigger");
  let triggers = [
    (
      insert_name.clone(),
      format!(
        "CREATE TRIGGER {} AFTER INSERT ON {table} BEGIN \
         INSERT INTO {log} (collection, op, doc_id, after_json, ts) \
         VALUES ('{collection}', '{}', NEW._id, NEW.data, {ts}); END",
        quote_ident(&insert_name),
        OperationType::Insert.code()
      ),
    ),
    (
      update_name.clone(),
      format!(
        "CREATE TRIGGER {} AFTER UPDATE ON {table} BEGIN \
         INSERT INTO {log} (collection, op, doc_id, before_json, after_json, ts) \
         VALUES ('{collection}', '{}', NEW._id, OLD.data, NEW.data, {ts}); END",
        quote_ident(&update_name),
        OperationType::Update.code()
      ),
    ),
    (
      delete_name.clone(),
      format!(
        "CREATE TRIGGER {} AFTER DELETE ON {table} BEGIN \
         INSERT INTO {log} (collection, op, doc_id, before_json, ts) \
         VALUES ('{collection}', '{}', OLD._id, OLD.data, {ts}); END",
        quote_ident(&delete_name),
        OperationType::Delete.code()
      ),
    ),
  ];

  for (name, ddl) in triggers {
    let mut stmt =
      conn.prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'trigger' AND name = ?1")?;
    let exists = stmt.exists(params![name])?;
    if !exists {
      conn.execute_batch(&ddl)?;
      tracing::debug!(trigger = %name, "capture trigger installed");
    }
  }
  Ok(())
}
