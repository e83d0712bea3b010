//! Integration tests across the database handle, tables and the store file.

use std::collections::HashSet;

use serde_json::{json, Value};
use tempfile::tempdir;

use jsondb_core::api::JsonDatabase;
use jsondb_core::error::{Error, QueryError, SchemaError, TableError};
use jsondb_core::query::{field, Predicate};
use jsondb_core::storage::{JsonStore, StoreOptions, SyncMode, WriteMode};
use jsondb_core::types::{Document, PARAMS_TABLE};

fn read_raw(path: &std::path::Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_persisted_file_format() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");
    let db = JsonDatabase::open(&path).unwrap();

    let users = db.table_with_keys("users", &["email"]).unwrap();
    users.add(json!({"email": "a@x.com", "name": "Alice"})).unwrap();
    users.add(json!({"email": "b@x.com", "name": "Bob"})).unwrap();
    db.table("empty").unwrap();

    assert_eq!(
        read_raw(&path),
        json!({
            "__params__": {
                "users": {"keys": ["email"]},
                "empty": {"keys": []}
            },
            "users": {
                "1": {"email": "a@x.com", "name": "Alice"},
                "2": {"email": "b@x.com", "name": "Bob"}
            },
            "empty": {}
        })
    );
}

#[test]
fn test_round_trip_through_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");
    let doc = json!({
        "name": "Alice",
        "age": 30,
        "score": 9.5,
        "tags": ["a", "b"],
        "address": {"city": "Portland"},
        "nick": null
    });

    {
        let db = JsonDatabase::open(&path).unwrap();
        assert_eq!(db.table("people").unwrap().add(doc.clone()).unwrap(), 1);
    }

    let db = JsonDatabase::open(&path).unwrap();
    let all = db.get_table("people").unwrap().get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id(), 1);
    assert_eq!(all[0].to_value(), doc);
}

#[test]
fn test_id_monotonicity_and_reset() {
    let dir = tempdir().unwrap();
    let db = JsonDatabase::open(dir.path().join("db.json")).unwrap();
    let t = db.table("t").unwrap();

    let mut issued = HashSet::new();
    for n in 0..3 {
        assert!(issued.insert(t.add(json!({"n": n})).unwrap()));
    }
    t.delete(&field("n").eq(2).unwrap()).unwrap();
    for n in 3..6 {
        assert!(issued.insert(t.add(json!({"n": n})).unwrap()));
    }

    t.reset().unwrap();
    t.reset().unwrap();
    assert!(t.get_all().unwrap().is_empty());
    assert_eq!(t.add(json!({"n": 0})).unwrap(), 1);
}

#[test]
fn test_constraint_enforcement_through_database() {
    let dir = tempdir().unwrap();
    let db = JsonDatabase::open(dir.path().join("db.json")).unwrap();
    let users = db.table_with_keys("users", &["email"]).unwrap();

    users.add(json!({"email": "a@x.com"})).unwrap();
    assert!(matches!(
        users.add(json!({"email": "a@x.com"})),
        Err(Error::Table(TableError::ConstraintViolation { .. }))
    ));
    users.add(json!({"name": "no-email"})).unwrap();
    users.add(json!({"name": "no-email-either"})).unwrap();
    assert_eq!(users.len().unwrap(), 3);
}

#[test]
fn test_predicate_identity() {
    let x_and_y = field("x").eq(1).unwrap() & field("y").eq(2).unwrap();
    let y_and_x = field("y").eq(2).unwrap() & field("x").eq(1).unwrap();
    let just_x = field("x").eq(1).unwrap();

    assert_eq!(x_and_y.key(), y_and_x.key());
    assert_eq!(x_and_y.fingerprint(), y_and_x.fingerprint());
    assert_ne!(x_and_y.key(), just_x.key());

    let mut cache = HashSet::new();
    cache.insert(x_and_y);
    assert!(cache.contains(&y_and_x));
    assert!(!cache.contains(&just_x));
}

#[test]
fn test_missing_path_tolerance_in_search() {
    let dir = tempdir().unwrap();
    let db = JsonDatabase::open(dir.path().join("db.json")).unwrap();
    let t = db.table("t").unwrap();
    t.add(json!({"a": 1})).unwrap();
    t.add(json!({"a": {"field_b": 5}})).unwrap();

    let found = t.search(&field("a").field("field_b").eq(5).unwrap()).unwrap();
    let ids: Vec<_> = found.iter().map(Document::id).collect();
    assert_eq!(ids, vec![2]);
}

#[test]
fn test_bulk_update_partial_rollback_is_persisted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");
    let db = JsonDatabase::open(&path).unwrap();
    let t = db.table_with_keys("t", &["k"]).unwrap();
    t.add(json!({"k": 1})).unwrap();
    t.add(json!({"k": 2})).unwrap();

    let ids = t.update(json!({"k": 2}), &field("k").eq(1).unwrap()).unwrap();
    assert!(ids.is_empty());
    assert_eq!(read_raw(&path)["t"], json!({"1": {"k": 1}, "2": {"k": 2}}));
}

#[test]
fn test_incomplete_query_rejected_on_evaluation() {
    let dir = tempdir().unwrap();
    let db = JsonDatabase::open(dir.path().join("db.json")).unwrap();
    let t = db.table("t").unwrap();
    t.add(json!({"a": 1})).unwrap();

    let incomplete = Predicate::from(field("a")) & field("a").eq(1).unwrap();
    assert!(matches!(
        t.search(&incomplete),
        Err(Error::Query(QueryError::EmptyQuery))
    ));
    assert!(matches!(
        jsondb_core::query::Query::new().eq(1),
        Err(QueryError::EmptyPath)
    ));
}

#[test]
fn test_reserved_table_name() {
    let dir = tempdir().unwrap();
    let db = JsonDatabase::open(dir.path().join("db.json")).unwrap();
    assert!(matches!(
        db.table_with_keys(PARAMS_TABLE, &["k"]),
        Err(Error::Schema(SchemaError::ReservedTableName(_)))
    ));
}

#[test]
fn test_malformed_file_opens_as_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");
    std::fs::write(&path, "{\"t\": {\"1\": ").unwrap();

    let db = JsonDatabase::open(&path).unwrap();
    assert!(db.table_names().is_empty());
    db.table("t").unwrap().add(json!({"x": 1})).unwrap();
    assert_eq!(read_raw(&path)["t"], json!({"1": {"x": 1}}));
}

#[test]
fn test_atomic_options_through_database() {
    let dir = tempdir().unwrap();
    let options = StoreOptions {
        write_mode: WriteMode::Atomic,
        sync: SyncMode::Full,
    };
    let db = JsonDatabase::open_with(dir.path().join("db.json"), options).unwrap();
    let t = db.table("t").unwrap();
    for n in 0..5 {
        t.add(json!({"n": n})).unwrap();
    }
    assert_eq!(t.len().unwrap(), 5);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

/// Two independent handles on one file share no coordination: the first
/// handle's cached next id goes stale once the second handle inserts.
#[test]
fn test_independent_handles_race_on_ids() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.json");

    let first = JsonDatabase::open(&path).unwrap();
    let t1 = first.table("t").unwrap();
    assert_eq!(t1.add(json!({"by": "first"})).unwrap(), 1);

    let second = JsonDatabase::open(&path).unwrap();
    let t2 = second.get_table("t").unwrap();
    assert_eq!(t2.add(json!({"by": "second"})).unwrap(), 2);

    match t1.add(json!({"by": "first again"})) {
        Err(Error::Table(TableError::DuplicateId { id: 2, .. })) => {}
        other => panic!("expected DuplicateId, got {other:?}"),
    }

    // Tables created through one handle are invisible to the other until
    // it is reopened, though the store content itself is re-read per call.
    second.table("other").unwrap();
    assert_eq!(first.table_names(), vec!["t"]);
    assert!(JsonStore::open(&path).unwrap().read().unwrap().contains_key("other"));
}
