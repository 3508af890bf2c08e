use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::document::{get_path, remove_path, set_path, Document, ID_FIELD};

/// A parsed projection: inclusion and exclusion are mutually exclusive,
/// except that `_id: 0` may accompany inclusions.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
  /// Empty spec: the full document.
  Identity,
  Include { paths: Vec<String>, keep_id: bool },
  Exclude { paths: Vec<String>, keep_id: bool },
}

impl Projection {
  pub fn parse(value: &Value) -> Result<Projection> {
    let obj = value
      .as_object()
      .ok_or_else(|| Error::validation("projection must be an object"))?;

    let mut id_flag = None;
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (path, flag) in obj {
      let include = truthy(flag)?;
      if path == ID_FIELD {
        id_flag = Some(include);
      } else if include {
        included.push(path.clone());
      } else {
        excluded.push(path.clone());
      }
    }

    if !included.is_empty() && !excluded.is_empty() {
      return Err(Error::validation(
        "cannot mix inclusion and exclusion in a projection",
      ));
    }

    if !included.is_empty() {
      return Ok(Projection::Include {
        paths: included,
        keep_id: id_flag != Some(false),
      });
    }
    if !excluded.is_empty() {
      if id_flag == Some(true) {
        return Err(Error::validation(
          "cannot mix inclusion and exclusion in a projection",
        ));
      }
      return Ok(Projection::Exclude {
        paths: excluded,
        keep_id: id_flag != Some(false),
      });
    }
    Ok(match id_flag {
      Some(true) => Projection::Include {
        paths: Vec::new(),
        keep_id: true,
      },
      Some(false) => Projection::Exclude {
        paths: Vec::new(),
        keep_id: false,
      },
      None => Projection::Identity,
    })
  }

  /// Shape one result document.
  pub fn apply(&self, doc: &Document) -> Document {
    match self {
      Projection::Identity => doc.clone(),
      Projection::Include { paths, keep_id } => {
        let mut out = Map::new();
        if *keep_id {
          if let Some(id) = doc.get(ID_FIELD) {
            out.insert(ID_FIELD.to_string(), id.clone());
          }
        }
        for path in paths {
          if let Some(value) = get_path(doc, path) {
            set_path(&mut out, path, value.clone());
          }
        }
        out
      }
      Projection::Exclude { paths, keep_id } => {
        let mut out = doc.clone();
        for path in paths {
          remove_path(&mut out, path);
        }
        if !keep_id {
          out.remove(ID_FIELD);
        }
        out
      }
    }
  }
}

fn truthy(value: &Value) -> Result<bool> {
  match value {
    Value::Bool(b) => Ok(*b),
    Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0) != 0.0),
    _ => Err(Error::validation(
      "projection values must be 0, 1, true, or false",
    )),
  }
}
