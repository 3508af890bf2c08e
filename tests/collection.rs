//! Collection facade tests - CRUD, filtering, projection, pagination

use mongolite::{Database, Error, UpdateOptions};
use serde_json::json;

async fn db() -> Database {
  Database::open_in_memory().await.unwrap()
}

// =============================================================================
// Insert + findOne
// =============================================================================

#[tokio::test]
async fn test_insert_and_find_one() {
  let db = db().await;
  let users = db.collection("users");

  let result = users
    .insert_one(json!({"name": "A", "age": 30}))
    .await
    .unwrap();
  assert!(!result.inserted_id.is_empty());

  let doc = users.find_one(json!({"name": "A"})).await.unwrap().unwrap();
  assert_eq!(doc["age"], json!(30));
  assert_eq!(doc["_id"], json!(result.inserted_id));
}

#[tokio::test]
async fn test_insert_preserves_caller_id() {
  let db = db().await;
  let users = db.collection("users");

  users
    .insert_one(json!({"_id": "u1", "name": "A"}))
    .await
    .unwrap();
  let doc = users.find_one(json!({"_id": "u1"})).await.unwrap().unwrap();
  assert_eq!(doc["name"], json!("A"));
}

#[tokio::test]
async fn test_duplicate_id_is_a_constraint_error() {
  let db = db().await;
  let users = db.collection("users");

  users.insert_one(json!({"_id": "dup"})).await.unwrap();
  let err = users.insert_one(json!({"_id": "dup"})).await.unwrap_err();
  assert!(matches!(err, Error::Constraint(_)));
}

#[tokio::test]
async fn test_non_string_id_is_rejected() {
  let db = db().await;
  let users = db.collection("users");
  let err = users.insert_one(json!({"_id": 7})).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_insert_many_rolls_back_on_duplicate() {
  let db = db().await;
  let users = db.collection("users");

  let err = users
    .insert_many(vec![
      json!({"_id": "a", "n": 1}),
      json!({"_id": "b", "n": 2}),
      json!({"_id": "a", "n": 3}),
    ])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Constraint(_)));
  assert_eq!(users.count_documents(json!({})).await.unwrap(), 0);
}

// =============================================================================
// Filters
// =============================================================================

#[tokio::test]
async fn test_compound_filter() {
  let db = db().await;
  let courses = db.collection("courses");
  courses
    .insert_many(vec![
      json!({"c": "DB", "p": 30}),
      json!({"c": "DS", "p": 50}),
      json!({"c": "DB", "p": 10}),
    ])
    .await
    .unwrap();

  let hits = courses
    .find(json!({"c": "DB", "p": {"$gt": 20}}))
    .to_array()
    .await
    .unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0]["p"], json!(30));
}

#[tokio::test]
async fn test_or_filter_returns_union() {
  let db = db().await;
  let items = db.collection("items");
  items
    .insert_many(vec![
      json!({"c": "X"}),
      json!({"c": "Y"}),
      json!({"c": "Z"}),
    ])
    .await
    .unwrap();

  let hits = items
    .find(json!({"$or": [{"c": "X"}, {"c": "Y"}]}))
    .to_array()
    .await
    .unwrap();
  assert_eq!(hits.len(), 2);
  assert!(hits.iter().all(|d| d["c"] != json!("Z")));
}

#[tokio::test]
async fn test_nor_and_not_filters() {
  let db = db().await;
  let items = db.collection("items");
  items
    .insert_many(vec![
      json!({"n": 1}),
      json!({"n": 2}),
      json!({"n": 3}),
    ])
    .await
    .unwrap();

  let hits = items
    .find(json!({"$nor": [{"n": 1}, {"n": 3}]}))
    .to_array()
    .await
    .unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0]["n"], json!(2));

  let hits = items
    .find(json!({"n": {"$not": {"$gt": 1}}}))
    .to_array()
    .await
    .unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0]["n"], json!(1));
}

#[tokio::test]
async fn test_in_nin_and_exists() {
  let db = db().await;
  let users = db.collection("users");
  users
    .insert_many(vec![
      json!({"role": "admin"}),
      json!({"role": "mod"}),
      json!({"name": "roleless"}),
    ])
    .await
    .unwrap();

  let hits = users
    .find(json!({"role": {"$in": ["admin", "mod"]}}))
    .to_array()
    .await
    .unwrap();
  assert_eq!(hits.len(), 2);

  let none = users
    .find(json!({"role": {"$in": []}}))
    .to_array()
    .await
    .unwrap();
  assert!(none.is_empty());

  let missing = users
    .find(json!({"role": {"$exists": false}}))
    .to_array()
    .await
    .unwrap();
  assert_eq!(missing.len(), 1);
  assert_eq!(missing[0]["name"], json!("roleless"));
}

#[tokio::test]
async fn test_null_equality_matches_missing_fields() {
  let db = db().await;
  let users = db.collection("users");
  users
    .insert_many(vec![
      json!({"nick": null, "n": 1}),
      json!({"n": 2}),
      json!({"nick": "x", "n": 3}),
    ])
    .await
    .unwrap();

  let hits = users.find(json!({"nick": null})).to_array().await.unwrap();
  assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn test_regex_uses_like_patterns() {
  let db = db().await;
  let users = db.collection("users");
  users
    .insert_many(vec![json!({"name": "Alice"}), json!({"name": "Bob"})])
    .await
    .unwrap();

  let hits = users
    .find(json!({"name": {"$regex": "Al%"}}))
    .to_array()
    .await
    .unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0]["name"], json!("Alice"));
}

#[tokio::test]
async fn test_nested_paths_and_booleans() {
  let db = db().await;
  let users = db.collection("users");
  users
    .insert_many(vec![
      json!({"addr": {"city": "NYC"}, "active": true}),
      json!({"addr": {"city": "LA"}, "active": false}),
    ])
    .await
    .unwrap();

  let hits = users
    .find(json!({"addr.city": "NYC"}))
    .to_array()
    .await
    .unwrap();
  assert_eq!(hits.len(), 1);

  let hits = users.find(json!({"active": true})).to_array().await.unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0]["addr"]["city"], json!("NYC"));
}

#[tokio::test]
async fn test_unknown_operator_is_rejected() {
  let db = db().await;
  let users = db.collection("users");
  let err = users.find(json!({"a": {"$near": 1}})).to_array().await;
  assert!(matches!(err, Err(Error::Validation(_))));
}

// =============================================================================
// Projection
// =============================================================================

#[tokio::test]
async fn test_projection_shapes_results() {
  let db = db().await;
  let users = db.collection("users");
  users
    .insert_one(json!({"name": "N", "age": 9, "addr": {"city": "C", "zip": "Z"}}))
    .await
    .unwrap();

  let docs = users
    .find(json!({}))
    .project(json!({"name": 1, "addr.city": 1}))
    .to_array()
    .await
    .unwrap();
  let doc = &docs[0];
  assert!(doc.contains_key("_id"));
  assert_eq!(doc["name"], json!("N"));
  assert_eq!(doc["addr"], json!({"city": "C"}));
  assert!(!doc.contains_key("age"));

  let docs = users
    .find(json!({}))
    .project(json!({"name": 1, "_id": 0}))
    .to_array()
    .await
    .unwrap();
  assert_eq!(serde_json::Value::Object(docs[0].clone()), json!({"name": "N"}));
}

#[tokio::test]
async fn test_mixed_projection_is_rejected() {
  let db = db().await;
  let users = db.collection("users");
  users.insert_one(json!({"a": 1, "b": 2})).await.unwrap();

  let err = users
    .find(json!({}))
    .project(json!({"a": 1, "b": 0}))
    .to_array()
    .await;
  assert!(matches!(err, Err(Error::Validation(_))));
}

// =============================================================================
// Sort, skip, limit
// =============================================================================

#[tokio::test]
async fn test_sort_and_pagination_are_disjoint() {
  let db = db().await;
  let items = db.collection("items");
  items
    .insert_many(vec![
      json!({"price": 20}),
      json!({"price": 10}),
      json!({"price": 30}),
    ])
    .await
    .unwrap();

  let page1 = items
    .find(json!({}))
    .sort(json!({"price": 1}))
    .limit(2)
    .to_array()
    .await
    .unwrap();
  let prices1: Vec<_> = page1.iter().map(|d| d["price"].clone()).collect();
  assert_eq!(prices1, vec![json!(10), json!(20)]);

  let page2 = items
    .find(json!({}))
    .sort(json!({"price": 1}))
    .skip(2)
    .limit(2)
    .to_array()
    .await
    .unwrap();
  let prices2: Vec<_> = page2.iter().map(|d| d["price"].clone()).collect();
  assert_eq!(prices2, vec![json!(30)]);
}

#[tokio::test]
async fn test_skip_without_limit() {
  let db = db().await;
  let items = db.collection("items");
  items
    .insert_many(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})])
    .await
    .unwrap();

  let rest = items
    .find(json!({}))
    .sort(json!({"n": 1}))
    .skip(1)
    .to_array()
    .await
    .unwrap();
  assert_eq!(rest.len(), 2);
  assert_eq!(rest[0]["n"], json!(2));
}

#[tokio::test]
async fn test_find_all_returns_each_document_once() {
  let db = db().await;
  let items = db.collection("items");
  for n in 0..5 {
    items.insert_one(json!({"n": n})).await.unwrap();
  }

  let all = items.find(json!({})).to_array().await.unwrap();
  assert_eq!(all.len(), 5);
  let mut ids: Vec<_> = all.iter().map(|d| d["_id"].to_string()).collect();
  ids.sort();
  ids.dedup();
  assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn test_cursor_for_each_and_stream() {
  let db = db().await;
  let items = db.collection("items");
  items
    .insert_many(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})])
    .await
    .unwrap();

  let mut seen = 0;
  items
    .find(json!({}))
    .for_each(|_| seen += 1)
    .await
    .unwrap();
  assert_eq!(seen, 3);

  use futures_util::StreamExt;
  let collected: Vec<_> = items.find(json!({})).into_stream().collect().await;
  assert_eq!(collected.len(), 3);
  assert!(collected.iter().all(|r| r.is_ok()));
}

// =============================================================================
// Counting
// =============================================================================

#[tokio::test]
async fn test_count_matches_materialised_length() {
  let db = db().await;
  let items = db.collection("items");
  items
    .insert_many(vec![
      json!({"k": 1}),
      json!({"k": 2}),
      json!({"k": 2}),
    ])
    .await
    .unwrap();

  let filter = json!({"k": 2});
  let counted = items.count_documents(filter.clone()).await.unwrap();
  let materialised = items.find(filter).to_array().await.unwrap();
  assert_eq!(counted, materialised.len() as u64);

  // Cursor count ignores skip/limit.
  let via_cursor = items.find(json!({})).limit(1).count().await.unwrap();
  assert_eq!(via_cursor, 3);
  assert_eq!(items.estimated_document_count().await.unwrap(), 3);
}

// =============================================================================
// Updates
// =============================================================================

#[tokio::test]
async fn test_set_updates_only_named_paths() {
  let db = db().await;
  let users = db.collection("users");
  let id = users
    .insert_one(json!({"name": "A", "age": 30}))
    .await
    .unwrap()
    .inserted_id;

  let result = users
    .update_one(json!({"_id": id.clone()}), json!({"$set": {"age": 31}}), None)
    .await
    .unwrap();
  assert_eq!(result.matched_count, 1);

  let doc = users.find_one(json!({"_id": id})).await.unwrap().unwrap();
  assert_eq!(doc["age"], json!(31));
  assert_eq!(doc["name"], json!("A"));
}

#[tokio::test]
async fn test_set_creates_intermediate_objects() {
  let db = db().await;
  let users = db.collection("users");
  users.insert_one(json!({"_id": "u", "n": 1})).await.unwrap();

  users
    .update_one(json!({"_id": "u"}), json!({"$set": {"addr.city": "NYC"}}), None)
    .await
    .unwrap();
  let doc = users.find_one(json!({"_id": "u"})).await.unwrap().unwrap();
  assert_eq!(doc["addr"]["city"], json!("NYC"));
}

#[tokio::test]
async fn test_inc_unset_push_rename_round_trip() {
  let db = db().await;
  let users = db.collection("users");
  users
    .insert_one(json!({"_id": "u", "hits": 5, "tmp": true, "old": "v"}))
    .await
    .unwrap();

  users
    .update_one(
      json!({"_id": "u"}),
      json!({
        "$inc": {"hits": 3, "fresh": 2},
        "$unset": {"tmp": ""},
        "$push": {"tags": "first"},
        "$rename": {"old": "new"}
      }),
      None,
    )
    .await
    .unwrap();

  let doc = users.find_one(json!({"_id": "u"})).await.unwrap().unwrap();
  assert_eq!(doc["hits"], json!(8));
  assert_eq!(doc["fresh"], json!(2));
  assert!(!doc.contains_key("tmp"));
  assert_eq!(doc["tags"], json!(["first"]));
  assert!(!doc.contains_key("old"));
  assert_eq!(doc["new"], json!("v"));
}

#[tokio::test]
async fn test_push_appends_to_existing_array() {
  let db = db().await;
  let users = db.collection("users");
  users
    .insert_one(json!({"_id": "u", "tags": ["a"]}))
    .await
    .unwrap();

  users
    .update_one(json!({"_id": "u"}), json!({"$push": {"tags": "b"}}), None)
    .await
    .unwrap();
  let doc = users.find_one(json!({"_id": "u"})).await.unwrap().unwrap();
  assert_eq!(doc["tags"], json!(["a", "b"]));
}

#[tokio::test]
async fn test_pull_removes_matching_elements() {
  let db = db().await;
  let users = db.collection("users");
  users
    .insert_one(json!({"_id": "u", "scores": [10, 25, 40]}))
    .await
    .unwrap();

  let result = users
    .update_one(
      json!({"_id": "u"}),
      json!({"$pull": {"scores": {"$gt": 20}}}),
      None,
    )
    .await
    .unwrap();
  assert_eq!(result.matched_count, 1);
  assert_eq!(result.modified_count, 1);

  let doc = users.find_one(json!({"_id": "u"})).await.unwrap().unwrap();
  assert_eq!(doc["scores"], json!([10]));
}

#[tokio::test]
async fn test_update_many_touches_all_matches() {
  let db = db().await;
  let items = db.collection("items");
  items
    .insert_many(vec![
      json!({"k": "a", "seen": 0}),
      json!({"k": "a", "seen": 0}),
      json!({"k": "b", "seen": 0}),
    ])
    .await
    .unwrap();

  let result = items
    .update_many(json!({"k": "a"}), json!({"$inc": {"seen": 1}}), None)
    .await
    .unwrap();
  assert_eq!(result.matched_count, 2);
  assert_eq!(items.count_documents(json!({"seen": 1})).await.unwrap(), 2);
  assert_eq!(items.count_documents(json!({"seen": 0})).await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_one_touches_a_single_match() {
  let db = db().await;
  let items = db.collection("items");
  items
    .insert_many(vec![json!({"k": "a"}), json!({"k": "a"})])
    .await
    .unwrap();

  let result = items
    .update_one(json!({"k": "a"}), json!({"$set": {"done": true}}), None)
    .await
    .unwrap();
  assert_eq!(result.matched_count, 1);
  assert_eq!(items.count_documents(json!({"done": true})).await.unwrap(), 1);
}

#[tokio::test]
async fn test_replacement_keeps_row_id() {
  let db = db().await;
  let users = db.collection("users");
  users
    .insert_one(json!({"_id": "u", "name": "A", "age": 30}))
    .await
    .unwrap();

  users
    .update_one(json!({"_id": "u"}), json!({"name": "B"}), None)
    .await
    .unwrap();
  let doc = users.find_one(json!({"_id": "u"})).await.unwrap().unwrap();
  assert_eq!(doc["name"], json!("B"));
  assert!(!doc.contains_key("age"));
  assert_eq!(doc["_id"], json!("u"));
}

#[tokio::test]
async fn test_replacement_cannot_rewrite_id() {
  let db = db().await;
  let users = db.collection("users");
  users.insert_one(json!({"_id": "u"})).await.unwrap();

  let err = users
    .update_one(json!({"_id": "u"}), json!({"_id": "other", "x": 1}), None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_upsert_inserts_synthesised_document() {
  let db = db().await;
  let stock = db.collection("stock");

  let result = stock
    .update_one(
      json!({"sku": "s1"}),
      json!({"$set": {"qty": 5}}),
      Some(UpdateOptions { upsert: true }),
    )
    .await
    .unwrap();
  assert_eq!(result.matched_count, 0);
  let upserted = result.upserted_id.expect("upsert should insert");

  let doc = stock.find_one(json!({"sku": "s1"})).await.unwrap().unwrap();
  assert_eq!(doc["qty"], json!(5));
  assert_eq!(doc["_id"], json!(upserted));

  // Second run matches; no second insert.
  let result = stock
    .update_one(
      json!({"sku": "s1"}),
      json!({"$set": {"qty": 6}}),
      Some(UpdateOptions { upsert: true }),
    )
    .await
    .unwrap();
  assert_eq!(result.matched_count, 1);
  assert!(result.upserted_id.is_none());
  assert_eq!(stock.count_documents(json!({})).await.unwrap(), 1);
}

// =============================================================================
// Deletes
// =============================================================================

#[tokio::test]
async fn test_delete_one_and_many() {
  let db = db().await;
  let items = db.collection("items");
  items
    .insert_many(vec![
      json!({"k": "a"}),
      json!({"k": "a"}),
      json!({"k": "b"}),
    ])
    .await
    .unwrap();

  let one = items.delete_one(json!({"k": "a"})).await.unwrap();
  assert_eq!(one.deleted_count, 1);
  assert_eq!(items.count_documents(json!({"k": "a"})).await.unwrap(), 1);

  let many = items.delete_many(json!({})).await.unwrap();
  assert_eq!(many.deleted_count, 2);
  assert_eq!(items.count_documents(json!({})).await.unwrap(), 0);
}

#[tokio::test]
async fn test_deleted_document_is_gone() {
  let db = db().await;
  let users = db.collection("users");
  users.insert_one(json!({"_id": "x"})).await.unwrap();

  users.delete_one(json!({"_id": "x"})).await.unwrap();
  assert!(users.find_one(json!({"_id": "x"})).await.unwrap().is_none());
}

// =============================================================================
// Handle lifecycle
// =============================================================================

#[tokio::test]
async fn test_operations_after_close_are_not_connected() {
  let db = db().await;
  let users = db.collection("users");
  users.insert_one(json!({"n": 1})).await.unwrap();

  db.close().await.unwrap();
  let err = users.insert_one(json!({"n": 2})).await.unwrap_err();
  assert!(matches!(err, Error::NotConnected));
  let err = users.find_one(json!({})).await.unwrap_err();
  assert!(matches!(err, Error::NotConnected));
}

#[tokio::test]
async fn test_list_collections_hides_internal_tables() {
  let db = db().await;
  db.collection("beta").insert_one(json!({})).await.unwrap();
  db.collection("alpha").insert_one(json!({})).await.unwrap();

  let names = db.list_collections().await.unwrap();
  assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
}

#[tokio::test]
async fn test_drop_collection_forgets_documents() {
  let db = db().await;
  let users = db.collection("users");
  users.insert_one(json!({"n": 1})).await.unwrap();

  users.drop().await.unwrap();
  assert_eq!(users.count_documents(json!({})).await.unwrap(), 0);
}
