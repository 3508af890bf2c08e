mod cursor;
mod indexes;

pub use cursor::Cursor;
pub use indexes::IndexModel;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter};
use serde_json::{Map, Value};

use crate::changes::ChangeStream;
use crate::db::sanitize::quote_ident;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::options::{ChangeStreamOptions, UpdateOptions};
use crate::query::{compile_update, CompiledUpdate, FilterCompiler};
use crate::types::{
  new_document_id, set_path, Document, Filter, UpdateOp, UpdateSpec, ID_FIELD,
};

#[derive(Debug, Clone)]
pub struct InsertOneResult {
  pub inserted_id: String,
}

#[derive(Debug, Clone)]
pub struct InsertManyResult {
  pub inserted_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
  pub matched_count: u64,
  pub modified_count: u64,
  pub upserted_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteResult {
  pub deleted_count: u64,
}

/// Client-side handle to one named collection. Cheap to clone; the backing
/// table is created lazily on first use.
#[derive(Clone)]
pub struct Collection {
  pub(crate) db: Database,
  pub(crate) name: String,
}

impl Collection {
  pub(crate) fn new(db: Database, name: &str) -> Self {
    Self {
      db,
      name: name.to_string(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub async fn insert_one(&self, document: Value) -> Result<InsertOneResult> {
    self.db.ensure_collection(&self.name).await?;
    let (id, data) = encode_for_insert(document)?;
    let sql = format!(
      "INSERT INTO {} (_id, data) VALUES (?1, ?2)",
      quote_ident(&self.name)
    );
    let bound_id = id.clone();
    self
      .db
      .inner
      .conn
      .call(move |conn| {
        conn
          .execute(&sql, params![bound_id, data])
          .map_err(|e| e.into())
      })
      .await?;
    Ok(InsertOneResult { inserted_id: id })
  }

  /// Insert a batch with one prepared statement inside one transaction; any
  /// row failure rolls the whole batch back.
  pub async fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
    self.db.ensure_collection(&self.name).await?;
    let mut rows = Vec::with_capacity(documents.len());
    for document in documents {
      rows.push(encode_for_insert(document)?);
    }
    let ids: Vec<String> = rows.iter().map(|(id, _)| id.clone()).collect();
    let sql = format!(
      "INSERT INTO {} (_id, data) VALUES (?1, ?2)",
      quote_ident(&self.name)
    );
    self
      .db
      .inner
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt = tx.prepare(&sql)?;
          for (id, data) in &rows {
            stmt.execute(params![id, data])?;
          }
        }
        tx.commit().map_err(|e| e.into())
      })
      .await?;
    Ok(InsertManyResult { inserted_ids: ids })
  }

  /// Build a lazy cursor. Nothing touches the engine (and no spec is
  /// validated) until the cursor is iterated.
  pub fn find(&self, filter: Value) -> Cursor {
    Cursor::new(self.clone(), filter)
  }

  pub async fn find_one(&self, filter: Value) -> Result<Option<Document>> {
    let mut cursor = self.find(filter).limit(1);
    cursor.next().await
  }

  pub async fn update_one(
    &self,
    filter: Value,
    update: Value,
    options: Option<UpdateOptions>,
  ) -> Result<UpdateResult> {
    self
      .execute_update(filter, update, options.unwrap_or_default(), false)
      .await
  }

  pub async fn update_many(
    &self,
    filter: Value,
    update: Value,
    options: Option<UpdateOptions>,
  ) -> Result<UpdateResult> {
    self
      .execute_update(filter, update, options.unwrap_or_default(), true)
      .await
  }

  pub async fn delete_one(&self, filter: Value) -> Result<DeleteResult> {
    self.execute_delete(filter, false).await
  }

  pub async fn delete_many(&self, filter: Value) -> Result<DeleteResult> {
    self.execute_delete(filter, true).await
  }

  pub async fn count_documents(&self, filter: Value) -> Result<u64> {
    self.db.ensure_collection(&self.name).await?;
    let tree = Filter::parse(&filter)?;
    let (where_sql, params) = where_clause(&tree)?;
    let sql = format!(
      "SELECT COUNT(*) FROM {}{}",
      quote_ident(&self.name),
      where_sql
    );
    self
      .db
      .inner
      .conn
      .call(move |conn| {
        conn
          .query_row(&sql, params_from_iter(params), |row| row.get::<_, i64>(0))
          .map_err(|e| e.into())
      })
      .await
      .map(|n| n as u64)
      .map_err(Error::from)
  }

  pub async fn estimated_document_count(&self) -> Result<u64> {
    self.count_documents(Value::Object(Map::new())).await
  }

  /// Subscribe to this collection's changes. Installs the capture triggers
  /// on first use and starts the database's shared poller.
  pub async fn watch(&self, options: Option<ChangeStreamOptions>) -> Result<ChangeStream> {
    self.db.ensure_collection(&self.name).await?;
    self
      .db
      .inner
      .router
      .subscribe(&self.db, &self.name, options.unwrap_or_default())
      .await
  }

  /// Drop the collection table. The engine cascades its indexes and
  /// triggers.
  pub async fn drop(&self) -> Result<()> {
    self.db.guard()?;
    let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(&self.name));
    self
      .db
      .inner
      .conn
      .call(move |conn| conn.execute_batch(&sql).map_err(|e| e.into()))
      .await?;
    self.db.forget_collection(&self.name);
    Ok(())
  }

  async fn execute_delete(&self, filter: Value, multi: bool) -> Result<DeleteResult> {
    self.db.ensure_collection(&self.name).await?;
    let tree = Filter::parse(&filter)?;
    let (where_sql, params) = where_clause(&tree)?;
    let table = quote_ident(&self.name);
    // Stock SQLite has no DELETE ... LIMIT; target one row via a subselect.
    let sql = if multi {
      format!("DELETE FROM {table}{where_sql}")
    } else {
      format!("DELETE FROM {table} WHERE _id IN (SELECT _id FROM {table}{where_sql} LIMIT 1)")
    };
    let deleted = self
      .db
      .inner
      .conn
      .call(move |conn| {
        conn
          .execute(&sql, params_from_iter(params))
          .map_err(|e| e.into())
      })
      .await?;
    Ok(DeleteResult {
      deleted_count: deleted as u64,
    })
  }

  async fn execute_update(
    &self,
    filter: Value,
    update: Value,
    options: UpdateOptions,
    multi: bool,
  ) -> Result<UpdateResult> {
    self.db.ensure_collection(&self.name).await?;
    let tree = Filter::parse(&filter)?;
    let spec = UpdateSpec::parse(&update)?;
    check_replacement_id(&tree, &spec)?;

    let compiled = FilterCompiler::for_collection().compile(&tree)?;
    let table = quote_ident(&self.name);
    let target = if multi {
      format!("WHERE {}", compiled.sql)
    } else {
      format!(
        "WHERE _id IN (SELECT _id FROM {table} WHERE {} LIMIT 1)",
        compiled.sql
      )
    };

    let plan = match compile_update(&spec)? {
      CompiledUpdate::Patch { set_expr, params } => {
        let mut all = params;
        all.extend(compiled.params.iter().cloned());
        UpdatePlan::Sql {
          sql: format!("UPDATE {table} SET data = {set_expr} {target}"),
          params: all,
        }
      }
      CompiledUpdate::Replace { doc_json } => {
        let mut all = vec![SqlValue::Text(doc_json)];
        all.extend(compiled.params.iter().cloned());
        UpdatePlan::Sql {
          sql: format!("UPDATE {table} SET data = json_set(?, '$._id', _id) {target}"),
          params: all,
        }
      }
      CompiledUpdate::ReadModifyWrite => {
        let UpdateSpec::Ops(ops) = &spec else {
          return Err(Error::validation("replacement cannot use read-modify-write"));
        };
        let limit = if multi { "" } else { " LIMIT 1" };
        UpdatePlan::ReadModifyWrite {
          select_sql: format!(
            "SELECT _id, data FROM {table} WHERE {}{limit}",
            compiled.sql
          ),
          select_params: compiled.params.clone(),
          update_sql: format!("UPDATE {table} SET data = ?1 WHERE _id = ?2"),
          ops: ops.clone(),
        }
      }
    };

    let upsert = if options.upsert {
      let (id, doc_json) = synthesize_upsert(&tree, &spec)?;
      Some(UpsertPlan {
        sql: format!("INSERT INTO {table} (_id, data) VALUES (?1, ?2)"),
        id,
        doc_json,
      })
    } else {
      None
    };

    let (matched, modified, upserted_id) = self
      .db
      .inner
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let (matched, modified) = match plan {
          UpdatePlan::Sql { sql, params } => {
            let n = tx.execute(&sql, params_from_iter(params))? as u64;
            (n, n)
          }
          UpdatePlan::ReadModifyWrite {
            select_sql,
            select_params,
            update_sql,
            ops,
          } => {
            let mut matched = 0u64;
            let mut rewrites = Vec::new();
            {
              let mut stmt = tx.prepare(&select_sql)?;
              let mut rows = stmt.query(params_from_iter(select_params))?;
              while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let data: String = row.get(1)?;
                let mut doc: Document = serde_json::from_str(&data)
                  .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                for op in &ops {
                  op.apply(&mut doc);
                }
                let rewritten = serde_json::to_string(&doc)
                  .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                matched += 1;
                if rewritten != data {
                  rewrites.push((rewritten, id));
                }
              }
            }
            let modified = rewrites.len() as u64;
            for (data, id) in rewrites {
              tx.execute(&update_sql, params![data, id])?;
            }
            (matched, modified)
          }
        };

        let mut upserted_id = None;
        if matched == 0 {
          if let Some(plan) = upsert {
            tx.execute(&plan.sql, params![plan.id, plan.doc_json])?;
            upserted_id = Some(plan.id);
          }
        }
        tx.commit()?;
        Ok((matched, modified, upserted_id))
      })
      .await?;

    Ok(UpdateResult {
      matched_count: matched,
      modified_count: modified,
      upserted_id,
    })
  }
}

enum UpdatePlan {
  Sql {
    sql: String,
    params: Vec<SqlValue>,
  },
  ReadModifyWrite {
    select_sql: String,
    select_params: Vec<SqlValue>,
    update_sql: String,
    ops: Vec<UpdateOp>,
  },
}

struct UpsertPlan {
  sql: String,
  id: String,
  doc_json: String,
}

/// Force an `_id` into the document (generating one when absent) and
/// serialise it for storage.
fn encode_for_insert(document: Value) -> Result<(String, String)> {
  let Value::Object(mut doc) = document else {
    return Err(Error::validation("document must be an object"));
  };
  let id = match doc.get(ID_FIELD) {
    None => {
      let id = new_document_id();
      doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
      id
    }
    Some(Value::String(id)) => id.clone(),
    Some(_) => return Err(Error::validation("_id must be a string")),
  };
  Ok((id, serde_json::to_string(&doc)?))
}

fn where_clause(filter: &Filter) -> Result<(String, Vec<SqlValue>)> {
  if matches!(filter, Filter::All) {
    return Ok((String::new(), Vec::new()));
  }
  let compiled = FilterCompiler::for_collection().compile(filter)?;
  Ok((format!(" WHERE {}", compiled.sql), compiled.params))
}

/// A replacement may carry `_id` only when it agrees with the filter's
/// pinned `_id`; the row key itself is forced back in SQL either way.
fn check_replacement_id(filter: &Filter, spec: &UpdateSpec) -> Result<()> {
  let UpdateSpec::Replace(doc) = spec else {
    return Ok(());
  };
  let Some(replacement_id) = doc.get(ID_FIELD) else {
    return Ok(());
  };
  let replacement_id = replacement_id
    .as_str()
    .ok_or_else(|| Error::validation("_id must be a string"))?;
  let pinned = filter
    .equality_constraints()
    .into_iter()
    .find(|(path, _)| *path == ID_FIELD)
    .and_then(|(_, value)| value.as_str().map(str::to_string));
  if let Some(pinned) = pinned {
    if pinned != replacement_id {
      return Err(Error::validation("_id is immutable"));
    }
  }
  Ok(())
}

/// Build the document inserted when an upsert matches nothing: the filter's
/// top-level equality constraints overlaid with the `$set`/replacement body.
fn synthesize_upsert(filter: &Filter, spec: &UpdateSpec) -> Result<(String, String)> {
  let mut doc = Document::new();
  for (path, value) in filter.equality_constraints() {
    if path == ID_FIELD {
      doc.insert(ID_FIELD.to_string(), value.clone());
    } else {
      set_path(&mut doc, path, value.clone());
    }
  }
  match spec {
    UpdateSpec::Replace(body) => {
      for (key, value) in body {
        doc.insert(key.clone(), value.clone());
      }
    }
    UpdateSpec::Ops(ops) => {
      for op in ops {
        if matches!(op, UpdateOp::Set { .. }) {
          op.apply(&mut doc);
        }
      }
    }
  }
  let id = match doc.get(ID_FIELD) {
    None => {
      let id = new_document_id();
      doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
      id
    }
    Some(Value::String(id)) => id.clone(),
    Some(_) => return Err(Error::validation("_id must be a string")),
  };
  Ok((id, serde_json::to_string(&doc)?))
}

pub(crate) fn parse_document(data: &str) -> Result<Document> {
  Ok(serde_json::from_str(data)?)
}
