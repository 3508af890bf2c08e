use crate::error::{Error, Result};

/// Collection names become table names and trigger-body literals, so the
/// charset is restricted up front.
pub fn validate_collection_name(name: &str) -> Result<()> {
  if name.is_empty() || name.len() > 128 {
    return Err(Error::validation("collection name must be 1-128 characters"));
  }
  let mut chars = name.chars();
  let first = chars.next().unwrap_or('!');
  if !(first.is_ascii_alphabetic() || first == '_') {
    return Err(Error::validation(
      "collection name must start with a letter or underscore",
    ));
  }
  if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
    return Err(Error::validation(
      "collection name may contain only letters, digits, '_' and '-'",
    ));
  }
  if name.starts_with("__mongolite") {
    return Err(Error::validation("the __mongolite prefix is reserved"));
  }
  Ok(())
}

/// Document paths are embedded in JSON path literals; restrict each dotted
/// segment to word characters. Digits-only segments are allowed (they
/// address array elements or numeric object keys, which the engine resolves
/// alike).
pub fn validate_path(path: &str) -> Result<()> {
  if path.is_empty() {
    return Err(Error::validation("empty document path"));
  }
  for segment in path.split('.') {
    if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
      return Err(Error::validation(format!("invalid document path: {path}")));
    }
  }
  Ok(())
}

/// Double-quote an identifier for DDL/DML.
pub fn quote_ident(name: &str) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}
