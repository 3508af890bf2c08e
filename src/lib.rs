//! MongoDB-style document collections on SQLite.
//!
//! Documents are JSON objects keyed by a string `_id`, stored one
//! collection per table. Filters, updates, projections, and index specs use
//! the familiar document-database vocabulary and are translated into
//! parameterised SQL over `json_extract` values. Change streams are
//! reconstructed from trigger-captured row deltas in a shared, totally
//! ordered change log.
//!
//! ```no_run
//! use serde_json::json;
//!
//! # async fn demo() -> mongolite::Result<()> {
//! let db = mongolite::connect("app.db").await?;
//! let users = db.collection("users");
//!
//! users.insert_one(json!({"name": "Ada", "age": 36})).await?;
//! let adults = users
//!   .find(json!({"age": {"$gte": 18}}))
//!   .sort(json!({"age": 1}))
//!   .limit(10)
//!   .to_array()
//!   .await?;
//! # let _ = adults;
//!
//! let mut stream = users.watch(None).await?;
//! while let Some(event) = stream.next().await? {
//!   println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod changes;
pub mod collection;
pub mod db;
pub mod error;
pub mod options;
pub mod query;
pub mod types;

pub use changes::ChangeStream;
pub use collection::{
  Collection, Cursor, DeleteResult, IndexModel, InsertManyResult, InsertOneResult, UpdateResult,
};
pub use db::Database;
pub use error::{Error, Result};
pub use options::{ChangeStreamOptions, DatabaseOptions, FullDocumentMode, UpdateOptions};
pub use types::{
  ChangeEvent, Document, OperationType, SortDirection, StreamEvent, UpdateDescription,
};

/// Open a database by path, or in memory with `":memory:"`.
pub async fn connect(path: &str) -> Result<Database> {
  Database::connect(path).await
}
