use serde_json::{Map, Value};
use uuid::Uuid;

/// A stored document: an ordered mapping from field names to JSON values.
pub type Document = Map<String, Value>;

/// The reserved identifier field.
pub const ID_FIELD: &str = "_id";

/// Generate a fresh opaque document id.
pub fn new_document_id() -> String {
  Uuid::new_v4().to_string()
}

/// Read the value at a dotted path, descending through nested objects.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
  let mut segments = path.split('.');
  let first = segments.next()?;
  let mut current = doc.get(first)?;
  for segment in segments {
    current = match current {
      Value::Object(map) => map.get(segment)?,
      Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
      _ => return None,
    };
  }
  Some(current)
}

/// Write a value at a dotted path, creating intermediate objects as needed.
/// Intermediate non-object values are replaced by objects.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
  let segments: Vec<&str> = path.split('.').collect();
  let mut current = doc;
  for segment in &segments[..segments.len() - 1] {
    let slot = current
      .entry(segment.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
      *slot = Value::Object(Map::new());
    }
    current = match slot {
      Value::Object(map) => map,
      _ => unreachable!(),
    };
  }
  current.insert(segments[segments.len() - 1].to_string(), value);
}

/// Remove the value at a dotted path. Missing intermediates are a no-op.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
  let segments: Vec<&str> = path.split('.').collect();
  let mut current = doc;
  for segment in &segments[..segments.len() - 1] {
    current = current.get_mut(*segment)?.as_object_mut()?;
  }
  current.remove(segments[segments.len() - 1])
}
