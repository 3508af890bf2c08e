use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::document::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
  Insert,
  Update,
  Delete,
}

impl OperationType {
  /// Single-letter code stored in the change log's `op` column.
  pub(crate) fn code(&self) -> &'static str {
    match self {
      Self::Insert => "I",
      Self::Update => "U",
      Self::Delete => "D",
    }
  }

  pub(crate) fn from_code(code: &str) -> Option<Self> {
    match code {
      "I" => Some(Self::Insert),
      "U" => Some(Self::Update),
      "D" => Some(Self::Delete),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentKey {
  #[serde(rename = "_id")]
  pub id: String,
}

/// Field-level summary of an update, diffed from the captured before/after
/// images at the top level and one level deep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescription {
  pub updated_fields: Map<String, Value>,
  pub removed_fields: Vec<String>,
}

impl UpdateDescription {
  pub fn between(before: &Document, after: &Document) -> Self {
    let mut updated_fields = Map::new();
    let mut removed_fields = Vec::new();

    for (key, after_value) in after {
      match before.get(key) {
        None => {
          updated_fields.insert(key.clone(), after_value.clone());
        }
        Some(before_value) if before_value == after_value => {}
        Some(Value::Object(before_nested)) => {
          if let Value::Object(after_nested) = after_value {
            for (sub, sub_after) in after_nested {
              if before_nested.get(sub) != Some(sub_after) {
                updated_fields.insert(format!("{key}.{sub}"), sub_after.clone());
              }
            }
            for sub in before_nested.keys() {
              if !after_nested.contains_key(sub) {
                removed_fields.push(format!("{key}.{sub}"));
              }
            }
          } else {
            updated_fields.insert(key.clone(), after_value.clone());
          }
        }
        Some(_) => {
          updated_fields.insert(key.clone(), after_value.clone());
        }
      }
    }

    for key in before.keys() {
      if !after.contains_key(key) {
        removed_fields.push(key.clone());
      }
    }

    Self {
      updated_fields,
      removed_fields,
    }
  }
}

/// One observed modification, reconstructed from a change-log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
  pub operation_type: OperationType,
  pub collection: String,
  pub document_key: DocumentKey,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub full_document: Option<Document>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub full_document_before_change: Option<Document>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub update_description: Option<UpdateDescription>,
  /// Ordering key: strictly increasing per subscriber.
  pub seq: i64,
  pub changed_at: DateTime<Utc>,
}

/// What a change-stream consumer receives. A `Dropped` marker signals that
/// the bounded delivery queue overflowed and `skipped` events were lost.
#[derive(Debug, Clone)]
pub enum StreamEvent {
  Change(ChangeEvent),
  Dropped { skipped: u64 },
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn doc(v: Value) -> Document {
    v.as_object().unwrap().clone()
  }

  #[test]
  fn diff_top_level() {
    let before = doc(json!({"a": 1, "b": 2, "gone": 3}));
    let after = doc(json!({"a": 1, "b": 20, "new": 4}));
    let d = UpdateDescription::between(&before, &after);
    assert_eq!(d.updated_fields["b"], json!(20));
    assert_eq!(d.updated_fields["new"], json!(4));
    assert!(!d.updated_fields.contains_key("a"));
    assert_eq!(d.removed_fields, vec!["gone".to_string()]);
  }

  #[test]
  fn diff_one_level_deep() {
    let before = doc(json!({"addr": {"city": "NYC", "zip": "10001"}}));
    let after = doc(json!({"addr": {"city": "LA"}}));
    let d = UpdateDescription::between(&before, &after);
    assert_eq!(d.updated_fields["addr.city"], json!("LA"));
    assert_eq!(d.removed_fields, vec!["addr.zip".to_string()]);
  }

  #[test]
  fn event_serializes_with_wire_names() {
    let event = ChangeEvent {
      operation_type: OperationType::Update,
      collection: "users".into(),
      document_key: DocumentKey { id: "x".into() },
      full_document: None,
      full_document_before_change: None,
      update_description: None,
      seq: 7,
      changed_at: Utc::now(),
    };
    let v = serde_json::to_value(&event).unwrap();
    assert_eq!(v["operationType"], json!("update"));
    assert_eq!(v["documentKey"]["_id"], json!("x"));
  }
}
