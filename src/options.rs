use std::time::Duration;

use serde_json::Value;

/// Tuning knobs for a database handle. The defaults suit most workloads;
/// tests shrink the poll interval and queue capacity.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
  /// How often the shared poller scans the change log.
  pub poll_interval: Duration,
  /// Bounded capacity of each change-stream delivery queue. When full, the
  /// oldest buffered event is discarded and the consumer receives a
  /// `Dropped` marker.
  pub queue_capacity: usize,
  /// Maximum change-log rows fetched per poll tick.
  pub fetch_batch: usize,
}

impl Default for DatabaseOptions {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_millis(100),
      queue_capacity: 1024,
      fetch_batch: 256,
    }
  }
}

/// Controls what `full_document` carries on update events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullDocumentMode {
  /// The post-image captured by the trigger at the time of the write.
  #[default]
  Default,
  /// Refetch the current document during the poll, picking up writes that
  /// landed after the captured one.
  UpdateLookup,
}

/// Options for `Collection::watch`.
#[derive(Debug, Clone, Default)]
pub struct ChangeStreamOptions {
  pub full_document: FullDocumentMode,
  /// Secondary filter applied to the post-image (inserts/updates) or the
  /// before-image (deletes). Same syntax as a find filter.
  pub filter: Option<Value>,
}

/// Options for `update_one` / `update_many`.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
  /// Insert a document synthesised from the filter's equality constraints
  /// and the update body when nothing matches.
  pub upsert: bool,
}
