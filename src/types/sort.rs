use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
  #[default]
  Asc,
  Desc,
}

impl SortDirection {
  pub(crate) fn sql(&self) -> &'static str {
    match self {
      Self::Asc => "ASC",
      Self::Desc => "DESC",
    }
  }
}

/// An ordered sequence of `(path, direction)` pairs, parsed from a
/// `{path: 1 | -1}` mapping (key order is preserved).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortSpec(pub Vec<(String, SortDirection)>);

impl SortSpec {
  pub fn parse(value: &Value) -> Result<SortSpec> {
    let obj = value
      .as_object()
      .ok_or_else(|| Error::validation("sort must be an object"))?;
    let mut terms = Vec::with_capacity(obj.len());
    for (path, direction) in obj {
      let direction = match direction.as_f64() {
        Some(d) if d == 1.0 => SortDirection::Asc,
        Some(d) if d == -1.0 => SortDirection::Desc,
        _ => {
          return Err(Error::validation(format!(
            "sort direction for {path} must be 1 or -1"
          )));
        }
      };
      terms.push((path.clone(), direction));
    }
    Ok(SortSpec(terms))
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}
