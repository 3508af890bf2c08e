use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use rusqlite::params;
use tokio::sync::Notify;

use crate::db::sanitize::quote_ident;
use crate::db::{Database, CHANGE_LOG_TABLE};
use crate::error::{Error, Result};
use crate::types::{ChangeEvent, StreamEvent};

/// Bounded delivery queue between the poller and one consumer. The poller
/// pushes; the consumer awaits on the notify handle. On overflow the oldest
/// event is discarded and the drop counter grows, surfacing as a
/// `StreamEvent::Dropped` marker ahead of the next delivery.
pub(crate) struct SubscriberQueue {
  capacity: usize,
  state: Mutex<QueueState>,
  notify: Notify,
}

struct QueueState {
  items: VecDeque<ChangeEvent>,
  dropped: u64,
  closed: bool,
}

impl SubscriberQueue {
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      state: Mutex::new(QueueState {
        items: VecDeque::new(),
        dropped: 0,
        closed: false,
      }),
      notify: Notify::new(),
    }
  }

  pub(crate) fn push(&self, event: ChangeEvent) {
    {
      let mut state = self.state.lock();
      if state.closed {
        return;
      }
      if state.items.len() >= self.capacity {
        state.items.pop_front();
        state.dropped += 1;
      }
      state.items.push_back(event);
    }
    self.notify.notify_one();
  }

  /// End the stream, discarding anything still buffered.
  pub(crate) fn close(&self) {
    {
      let mut state = self.state.lock();
      state.closed = true;
      state.items.clear();
      state.dropped = 0;
    }
    self.notify.notify_one();
  }
}

/// An ordered sequence of change events for one collection.
///
/// State machine: Created → Running → Closed. `close` detaches the stream
/// from the poller and discards buffered events; a pending `next` resolves
/// to end-of-stream. Events become visible within one poll interval after
/// the write commits.
pub struct ChangeStream {
  db: Database,
  collection: String,
  id: u64,
  queue: Arc<SubscriberQueue>,
  terminated: bool,
}

impl ChangeStream {
  pub(crate) fn new(
    db: Database,
    collection: String,
    id: u64,
    queue: Arc<SubscriberQueue>,
  ) -> Self {
    Self {
      db,
      collection,
      id,
      queue,
      terminated: false,
    }
  }

  pub fn collection(&self) -> &str {
    &self.collection
  }

  /// Await the next event. Returns `Ok(None)` once when the stream closes;
  /// iterating past end-of-stream is an error.
  pub async fn next(&mut self) -> Result<Option<StreamEvent>> {
    if self.terminated {
      return Err(Error::ChangeStreamClosed);
    }
    let queue = Arc::clone(&self.queue);
    loop {
      let notified = queue.notify.notified();
      {
        let mut state = queue.state.lock();
        if state.dropped > 0 {
          let skipped = state.dropped;
          state.dropped = 0;
          return Ok(Some(StreamEvent::Dropped { skipped }));
        }
        if let Some(event) = state.items.pop_front() {
          return Ok(Some(StreamEvent::Change(event)));
        }
        if state.closed {
          self.terminated = true;
          return Ok(None);
        }
      }
      notified.await;
    }
  }

  pub fn into_stream(self) -> impl Stream<Item = Result<StreamEvent>> {
    stream::try_unfold(self, |mut s| async move {
      Ok(s.next().await?.map(|event| (event, s)))
    })
  }

  /// Push-style consumption: invoke the callback for every event until the
  /// stream closes.
  pub async fn for_each<F>(mut self, mut f: F) -> Result<()>
  where
    F: FnMut(StreamEvent),
  {
    while let Some(event) = self.next().await? {
      f(event);
    }
    Ok(())
  }

  /// Detach from the poller and end the stream. Idempotent.
  pub fn close(&mut self) {
    self.db.inner.router.unsubscribe(self.id);
  }

  /// Close, then garbage-collect change-log rows every remaining
  /// subscription has consumed, and drop this collection's triggers if it
  /// has no subscribers left.
  pub async fn cleanup(mut self) -> Result<()> {
    self.close();
    self.db.guard()?;

    let min_seen = self.db.inner.router.min_last_seen();
    let drop_triggers = !self.db.inner.router.has_subscribers_for(&self.collection);
    let collection = self.collection.clone();
    self
      .db
      .inner
      .conn
      .call(move |conn| {
        let log = quote_ident(CHANGE_LOG_TABLE);
        match min_seen {
          Some(seq) => {
            conn.execute(&format!("DELETE FROM {log} WHERE seq <= ?1"), params![seq])?;
          }
          None => {
            conn.execute(&format!("DELETE FROM {log}"), [])?;
          }
        }
        if drop_triggers {
          for kind in ["insert", "update", "delete"] {
            let trigger = quote_ident(&format!("{collection}_{kind}_trigger"));
            conn.execute_batch(&format!("DROP TRIGGER IF EXISTS {trigger}"))?;
          }
        }
        Ok(())
      })
      .await?;
    tracing::debug!(collection = %self.collection, "change log compacted");
    Ok(())
  }
}

impl Drop for ChangeStream {
  fn drop(&mut self) {
    self.close();
  }
}
