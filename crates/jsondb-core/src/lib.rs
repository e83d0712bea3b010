//! # jsondb
//!
//! An embedded document store that keeps every table in one
//! human-readable JSON file.
//!
//! Tables hold JSON objects under auto-incrementing integer ids, may declare
//! primary-key fields that must be unique per table, and are queried with a
//! small composable predicate language.
//!
//! ## Quick Start
//!
//! ```no_run
//! use jsondb_core::api::JsonDatabase;
//! use jsondb_core::query::field;
//! use serde_json::json;
//!
//! let db = JsonDatabase::open("my_database.json").unwrap();
//! let users = db.table_with_keys("users", &["email"]).unwrap();
//!
//! users.add(json!({"name": "Alice", "email": "alice@example.com", "age": 30})).unwrap();
//! users.add(json!({"name": "Bob", "email": "bob@example.com", "age": 17})).unwrap();
//!
//! let adults = users.search(&field("age").ge(18).unwrap()).unwrap();
//! assert_eq!(adults.len(), 1);
//! assert_eq!(adults[0].get("name"), Some(&json!("Alice")));
//! ```

pub mod api;
pub mod error;
pub mod query;
pub mod storage;
pub mod table;
pub mod types;
