use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{Error, SchemaError};
use crate::storage::{JsonStore, StoreOptions};
use crate::table::Table;
use crate::types::{StoreDocument, PARAMS_KEYS_FIELD, PARAMS_TABLE};

/// The main database handle.
///
/// Maps table names to [`Table`] handles sharing one [`JsonStore`], and
/// records each table's key fields in the reserved `__params__` entry.
pub struct JsonDatabase {
    store: Arc<JsonStore>,
    tables: RwLock<BTreeMap<String, Arc<Table>>>,
}

impl JsonDatabase {
    /// Open (or create) the database file at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open (or create) the database file at `path`.
    ///
    /// Rebuilds a table handle for every table found in the store or in
    /// `__params__`, restoring its declared key fields.
    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, Error> {
        let store = Arc::new(JsonStore::open_with(path, options)?);
        let doc = store.read()?;
        let params = read_params(&doc);

        let mut tables = BTreeMap::new();
        let names = doc
            .keys()
            .filter(|name| name.as_str() != PARAMS_TABLE)
            .chain(params.keys());
        for name in names {
            if tables.contains_key(name) {
                continue;
            }
            let keys = params.get(name).cloned().unwrap_or_default();
            tables.insert(
                name.clone(),
                Arc::new(Table::new(name.clone(), store.clone(), keys)),
            );
        }

        info!(path = %store.path().display(), tables = tables.len(), "database opened");

        Ok(Self {
            store,
            tables: RwLock::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Get a table, creating it without key fields if it does not exist.
    pub fn table(&self, name: &str) -> Result<Arc<Table>, Error> {
        self.table_with_keys(name, &[])
    }

    /// Get a table, creating it with `keys` as its primary-key fields if it
    /// does not exist. The keys of an existing table are left unchanged.
    pub fn table_with_keys(&self, name: &str, keys: &[&str]) -> Result<Arc<Table>, Error> {
        if name == PARAMS_TABLE {
            return Err(SchemaError::ReservedTableName(name.to_string()).into());
        }
        if let Some(table) = self.tables.read().get(name) {
            return Ok(table.clone());
        }

        let mut tables = self.tables.write();
        if let Some(table) = tables.get(name) {
            return Ok(table.clone());
        }

        let mut declared: Vec<String> = Vec::with_capacity(keys.len());
        for key in keys {
            if !declared.iter().any(|k| k == key) {
                declared.push(key.to_string());
            }
        }

        self.modify_store(|doc| {
            with_params(doc, |params| {
                params.insert(name.to_string(), json!({ PARAMS_KEYS_FIELD: declared }));
            });
            if !doc.contains_key(name) {
                doc.insert(name.to_string(), Value::Object(Map::new()));
            }
        })?;

        let table = Arc::new(Table::new(name, self.store.clone(), declared));
        tables.insert(name.to_string(), table.clone());
        info!(table = name, keys = ?table.keys(), "table created");
        Ok(table)
    }

    /// Look up an existing table.
    pub fn get_table(&self, name: &str) -> Result<Arc<Table>, Error> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::TableNotFound(name.to_string()).into())
    }

    /// Register `field` as a primary-key field of `table` and record it in
    /// `__params__`, in one write.
    pub fn add_key(&self, table: &str, field: &str) -> Result<(), Error> {
        let handle = self.get_table(table)?;
        handle.add_key_with(field, |doc| record_key(doc, table, field))?;
        info!(table, field, "key field added");
        Ok(())
    }

    /// Drop one table: its content, its `__params__` entry and its handle.
    pub fn drop_table(&self, name: &str) -> Result<(), Error> {
        if !self.tables.read().contains_key(name) {
            return Err(SchemaError::TableNotFound(name.to_string()).into());
        }

        self.modify_store(|doc| {
            let kept: StoreDocument = std::mem::take(doc)
                .into_iter()
                .filter(|(key, _)| key != name)
                .collect();
            *doc = kept;
            if let Some(Value::Object(params)) = doc.get_mut(PARAMS_TABLE) {
                let kept: Map<String, Value> = std::mem::take(params)
                    .into_iter()
                    .filter(|(key, _)| key != name)
                    .collect();
                *params = kept;
            }
        })?;
        self.tables.write().remove(name);

        info!(table = name, "table dropped");
        Ok(())
    }

    /// Drop every table, leaving an empty store document.
    pub fn drop_all(&self) -> Result<(), Error> {
        self.store.write(&Map::new())?;
        self.tables.write().clear();
        info!(path = %self.store.path().display(), "all tables dropped");
        Ok(())
    }

    /// Delete the backing file.
    pub fn destroy(self) -> Result<(), Error> {
        self.tables.write().clear();
        self.store.destroy()?;
        info!(path = %self.store.path().display(), "database destroyed");
        Ok(())
    }

    /// Names of all known tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    fn modify_store<F>(&self, mutate: F) -> Result<(), Error>
    where
        F: FnOnce(&mut StoreDocument),
    {
        let mut doc = self.store.read()?;
        mutate(&mut doc);
        self.store.write(&doc)?;
        Ok(())
    }
}

/// Parse the `__params__` entry into table name to key fields.
fn read_params(doc: &StoreDocument) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    let Some(params) = doc.get(PARAMS_TABLE) else {
        return out;
    };
    let Some(params) = params.as_object() else {
        warn!("__params__ entry is not an object, ignoring");
        return out;
    };

    for (name, entry) in params {
        let keys = entry
            .get(PARAMS_KEYS_FIELD)
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_else(|| {
                warn!(table = %name, "malformed key list in __params__, assuming none");
                Vec::new()
            });
        out.insert(name.clone(), keys);
    }
    out
}

/// Append `field` to the declared keys of `table` in `__params__`.
fn record_key(doc: &mut StoreDocument, table: &str, field: &str) {
    with_params(doc, |params| {
        let entry = params
            .entry(table.to_string())
            .or_insert_with(|| json!({ PARAMS_KEYS_FIELD: [] }));
        if !entry.is_object() {
            *entry = json!({ PARAMS_KEYS_FIELD: [] });
        }
        let Some(obj) = entry.as_object_mut() else {
            return;
        };
        let keys = obj
            .entry(PARAMS_KEYS_FIELD)
            .or_insert_with(|| Value::Array(Vec::new()));
        if !keys.is_array() {
            *keys = Value::Array(Vec::new());
        }
        if let Some(list) = keys.as_array_mut() {
            if !list.iter().any(|k| k.as_str() == Some(field)) {
                list.push(Value::String(field.to_string()));
            }
        }
    });
}

/// Run `f` on the `__params__` object, creating (or repairing) it first.
fn with_params<F>(doc: &mut StoreDocument, f: F)
where
    F: FnOnce(&mut Map<String, Value>),
{
    let entry = doc
        .entry(PARAMS_TABLE)
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(params) = entry {
        f(params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;
    use crate::query::field;
    use tempfile::tempdir;

    fn create_test_db() -> (JsonDatabase, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = JsonDatabase::open(dir.path().join("db.json")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_create_table_records_params() {
        let (db, _dir) = create_test_db();
        db.table_with_keys("users", &["email", "email"]).unwrap();

        let raw = JsonStore::open(db.path()).unwrap().read().unwrap();
        assert_eq!(raw.get("users"), Some(&json!({})));
        assert_eq!(
            raw.get(PARAMS_TABLE),
            Some(&json!({"users": {"keys": ["email"]}}))
        );
    }

    #[test]
    fn test_table_is_create_or_get() {
        let (db, _dir) = create_test_db();
        let first = db.table_with_keys("users", &["email"]).unwrap();
        let second = db.table_with_keys("users", &["other"]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.keys(), vec!["email".to_string()]);
    }

    #[test]
    fn test_reserved_name_rejected() {
        let (db, _dir) = create_test_db();
        assert!(matches!(
            db.table(PARAMS_TABLE),
            Err(Error::Schema(SchemaError::ReservedTableName(_)))
        ));
        assert!(db.table_names().is_empty());
    }

    #[test]
    fn test_reopen_restores_tables_and_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");

        {
            let db = JsonDatabase::open(&path).unwrap();
            let users = db.table_with_keys("users", &["email"]).unwrap();
            users.add(json!({"email": "a@x.com"})).unwrap();
            db.table("empty").unwrap();
            db.table("plain").unwrap().add(json!({"x": 1})).unwrap();
        }

        let db = JsonDatabase::open(&path).unwrap();
        assert_eq!(db.table_names(), vec!["empty", "plain", "users"]);

        let users = db.get_table("users").unwrap();
        assert_eq!(users.keys(), vec!["email".to_string()]);
        assert!(matches!(
            users.add(json!({"email": "a@x.com"})),
            Err(Error::Table(TableError::ConstraintViolation { .. }))
        ));
        assert!(db.get_table("plain").unwrap().keys().is_empty());
    }

    #[test]
    fn test_table_without_params_entry_restored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, r#"{"legacy": {"1": {"a": 1}}}"#).unwrap();

        let db = JsonDatabase::open(&path).unwrap();
        let legacy = db.get_table("legacy").unwrap();
        assert!(legacy.keys().is_empty());
        assert_eq!(legacy.len().unwrap(), 1);
    }

    #[test]
    fn test_add_key_persists_into_params() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");

        {
            let db = JsonDatabase::open(&path).unwrap();
            let t = db.table_with_keys("t", &["a"]).unwrap();
            t.add(json!({"a": 1})).unwrap();
            db.add_key("t", "b").unwrap();
            db.add_key("t", "b").unwrap();
            assert_eq!(t.keys(), vec!["a".to_string(), "b".to_string()]);
            assert_eq!(t.get(1).unwrap().unwrap().get("b"), Some(&Value::Null));
        }

        let db = JsonDatabase::open(&path).unwrap();
        assert_eq!(
            db.get_table("t").unwrap().keys(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_add_key_writes_backfill_and_params_together() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        let db = JsonDatabase::open(&path).unwrap();
        let t = db.table_with_keys("t", &["a"]).unwrap();
        t.add(json!({"a": 1})).unwrap();
        db.add_key("t", "b").unwrap();

        let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["t"]["1"], json!({"a": 1, "b": null}));
        assert_eq!(raw[PARAMS_TABLE]["t"][PARAMS_KEYS_FIELD], json!(["a", "b"]));
    }

    #[test]
    fn test_add_key_failure_leaves_keys_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        let db = JsonDatabase::open(&path).unwrap();
        let t = db.table_with_keys("t", &["a"]).unwrap();

        // A directory in place of the file makes the store cycle fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(matches!(db.add_key("t", "b"), Err(Error::Storage(_))));
        assert_eq!(t.keys(), vec!["a".to_string()]);
    }

    #[test]
    fn test_add_key_unknown_table() {
        let (db, _dir) = create_test_db();
        assert!(matches!(
            db.add_key("nope", "k"),
            Err(Error::Schema(SchemaError::TableNotFound(_)))
        ));
    }

    #[test]
    fn test_drop_table() {
        let (db, _dir) = create_test_db();
        db.table_with_keys("a", &["k"]).unwrap().add(json!({"k": 1})).unwrap();
        db.table("b").unwrap().add(json!({"k": 2})).unwrap();

        db.drop_table("a").unwrap();
        assert_eq!(db.table_names(), vec!["b"]);

        let raw = JsonStore::open(db.path()).unwrap().read().unwrap();
        assert!(raw.get("a").is_none());
        assert_eq!(raw.get(PARAMS_TABLE), Some(&json!({"b": {"keys": []}})));

        assert!(matches!(
            db.drop_table("a"),
            Err(Error::Schema(SchemaError::TableNotFound(_)))
        ));
    }

    #[test]
    fn test_drop_all_and_destroy() {
        let (db, _dir) = create_test_db();
        db.table("a").unwrap().add(json!({"x": 1})).unwrap();
        db.drop_all().unwrap();
        assert!(db.table_names().is_empty());
        assert!(JsonStore::open(db.path()).unwrap().read().unwrap().is_empty());

        let path = db.path().to_path_buf();
        db.destroy().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_tables_share_one_store() {
        let (db, _dir) = create_test_db();
        let users = db.table("users").unwrap();
        let posts = db.table("posts").unwrap();
        users.add(json!({"name": "Alice"})).unwrap();
        posts.add(json!({"title": "Hi", "author": 1})).unwrap();

        let found = posts.search(&field("author").eq(1).unwrap()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(users.get_all().unwrap().len(), 1);
    }
}
