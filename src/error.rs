use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed filter, update, projection, or sort specification.
  #[error("validation error: {0}")]
  Validation(String),

  /// Operation attempted on a closed database handle.
  #[error("database handle is closed")]
  NotConnected,

  /// Uniqueness violation, e.g. inserting a duplicate `_id`.
  #[error("constraint violation: {0}")]
  Constraint(String),

  /// Iteration on a change stream that has already ended.
  #[error("change stream is closed")]
  ChangeStreamClosed,

  /// Any other failure reported by the underlying engine.
  #[error("engine error: {0}")]
  Engine(String),

  #[error("serialization error: {0}")]
  Json(#[from] serde_json::Error),
}

impl Error {
  pub(crate) fn validation(msg: impl Into<String>) -> Self {
    Error::Validation(msg.into())
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    match e {
      rusqlite::Error::SqliteFailure(failure, ref msg)
        if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
      {
        Error::Constraint(msg.clone().unwrap_or_else(|| failure.to_string()))
      }
      other => Error::Engine(other.to_string()),
    }
  }
}

impl From<tokio_rusqlite::Error> for Error {
  fn from(e: tokio_rusqlite::Error) -> Self {
    match e {
      tokio_rusqlite::Error::ConnectionClosed => Error::NotConnected,
      tokio_rusqlite::Error::Rusqlite(inner) => Error::from(inner),
      other => Error::Engine(other.to_string()),
    }
  }
}
