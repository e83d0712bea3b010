//! Tables: named, key-constrained document collections backed by the store.
//!
//! Every mutation is one read-modify-write cycle: read the whole store
//! document, copy this table's entry into an owned snapshot, mutate the
//! snapshot, then write the whole store document back with the table's
//! entry replaced. If the mutation fails, nothing is written.

pub mod constraint;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, TableError};
use crate::query::Predicate;
use crate::storage::JsonStore;
use crate::types::{DocId, Document, Fields, StoreDocument, KEY_PLACEHOLDER};

use constraint::find_conflict;

/// Per-handle id allocation state.
///
/// `next` is the cached id to hand out; `high_water` is the largest id this
/// handle has allocated, which keeps ids increasing after the cache is
/// dropped and the highest documents are deleted.
#[derive(Debug, Default)]
struct IdAllocator {
    next: Option<DocId>,
    high_water: DocId,
}

/// A named collection of documents stored under one key of the store.
#[derive(Debug)]
pub struct Table {
    name: String,
    store: Arc<JsonStore>,
    keys: RwLock<Vec<String>>,
    ids: Mutex<IdAllocator>,
}

impl Table {
    /// Create a handle for table `name` with the given primary-key fields.
    ///
    /// Nothing is written until the first mutation.
    pub fn new(name: impl Into<String>, store: Arc<JsonStore>, keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            store,
            keys: RwLock::new(keys),
            ids: Mutex::new(IdAllocator::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared primary-key fields, in declaration order.
    pub fn keys(&self) -> Vec<String> {
        self.keys.read().clone()
    }

    /// All documents of this table, in stored order.
    ///
    /// A missing or malformed table entry reads as empty.
    pub fn read(&self) -> Result<Vec<Document>, Error> {
        let store_doc = self.store.read()?;
        Ok(self.snapshot(&store_doc))
    }

    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, id: DocId) -> Result<Option<Document>, Error> {
        Ok(self.read()?.into_iter().find(|doc| doc.id() == id))
    }

    pub fn contains(&self, id: DocId) -> Result<bool, Error> {
        Ok(self.get(id)?.is_some())
    }

    /// Allocate the id for the next inserted document.
    ///
    /// Uses the cached next id when present; otherwise computes one past
    /// the largest id in the table (or 1 for an empty table) and caches the
    /// id after it.
    pub fn get_next_id(&self) -> Result<DocId, Error> {
        let mut ids = self.ids.lock();

        if let Some(next) = ids.next {
            ids.next = next.checked_add(1);
            ids.high_water = ids.high_water.max(next);
            return Ok(next);
        }

        let max_existing = self.read()?.iter().map(Document::id).max().unwrap_or(0);
        let id = max_existing
            .max(ids.high_water)
            .checked_add(1)
            .ok_or_else(|| TableError::IdSpaceExhausted {
                table: self.name.clone(),
            })?;
        ids.next = id.checked_add(1);
        ids.high_water = id;
        Ok(id)
    }

    /// Insert a document under a freshly allocated id.
    pub fn add(&self, document: Value) -> Result<DocId, Error> {
        let fields = into_fields(document)?;
        let id = self.get_next_id()?;
        self.insert(id, fields)
    }

    /// Insert a document under a caller-chosen id.
    ///
    /// Drops the id cache, since `id` may be at or past the cached value.
    pub fn add_with_id(&self, document: Value, id: DocId) -> Result<DocId, Error> {
        let fields = into_fields(document)?;
        self.ids.lock().next = None;
        let id = self.insert(id, fields)?;
        let mut ids = self.ids.lock();
        ids.high_water = ids.high_water.max(id);
        Ok(id)
    }

    fn insert(&self, id: DocId, fields: Fields) -> Result<DocId, Error> {
        let keys = self.keys();

        self.modify(|docs| {
            if docs.iter().any(|doc| doc.id() == id) {
                return Err(TableError::DuplicateId {
                    table: self.name.clone(),
                    id,
                }
                .into());
            }
            if let Some(conflicting_id) = find_conflict(docs, &fields, &keys, None) {
                return Err(TableError::ConstraintViolation {
                    table: self.name.clone(),
                    keys: keys.clone(),
                    conflicting_id,
                }
                .into());
            }
            docs.push(Document::new(id, fields));
            Ok(id)
        })?;

        debug!(table = %self.name, id, "document added");
        Ok(id)
    }

    /// Merge `changes` into every document matching `matching`.
    ///
    /// Each merged document is re-checked against the key constraint. A
    /// document whose merge would collide keeps its prior content and is
    /// left out of the returned ids; the other matches are still updated.
    pub fn update(&self, changes: Value, matching: &Predicate) -> Result<Vec<DocId>, Error> {
        let changes = into_fields(changes)?;
        let keys = self.keys();

        self.modify(|docs| {
            let mut updated = Vec::new();

            for i in 0..docs.len() {
                if !matching.eval(docs[i].fields())? {
                    continue;
                }

                let id = docs[i].id();
                let mut merged = docs[i].fields().clone();
                for (field, value) in &changes {
                    merged.insert(field.clone(), value.clone());
                }

                if let Some(conflicting_id) = find_conflict(docs, &merged, &keys, Some(id)) {
                    warn!(table = %self.name, id, conflicting_id, "update rolled back: key constraint violation");
                    continue;
                }

                *docs[i].fields_mut() = merged;
                updated.push(id);
            }

            debug!(table = %self.name, updated = updated.len(), "documents updated");
            Ok(updated)
        })
    }

    /// Update the document whose id is `changes.id()`.
    ///
    /// With `append`, every field of `changes` must be an array and is
    /// concatenated onto the existing array (or set, if absent). Without it,
    /// fields are overwritten.
    pub fn update_by_id(&self, changes: Document, append: bool) -> Result<DocId, Error> {
        let id = changes.id();
        let keys = self.keys();

        self.modify(|docs| {
            let Some(pos) = docs.iter().position(|doc| doc.id() == id) else {
                return Err(TableError::NotFound {
                    table: self.name.clone(),
                    id,
                }
                .into());
            };

            let mut merged = docs[pos].fields().clone();
            for (field, value) in changes.fields() {
                if !append {
                    merged.insert(field.clone(), value.clone());
                    continue;
                }
                let Value::Array(extra) = value else {
                    return Err(TableError::AppendTypeMismatch {
                        field: field.clone(),
                    }
                    .into());
                };
                match merged.get_mut(field) {
                    Some(Value::Array(existing)) => existing.extend(extra.iter().cloned()),
                    Some(_) => {
                        return Err(TableError::AppendTypeMismatch {
                            field: field.clone(),
                        }
                        .into());
                    }
                    None => {
                        merged.insert(field.clone(), value.clone());
                    }
                }
            }

            if let Some(conflicting_id) = find_conflict(docs, &merged, &keys, Some(id)) {
                return Err(TableError::ConstraintViolation {
                    table: self.name.clone(),
                    keys: keys.clone(),
                    conflicting_id,
                }
                .into());
            }

            *docs[pos].fields_mut() = merged;
            Ok(id)
        })
    }

    /// Delete every document matching `matching`; returns the deleted ids.
    pub fn delete(&self, matching: &Predicate) -> Result<Vec<DocId>, Error> {
        self.modify(|docs| {
            let mut deleted = Vec::new();
            for doc in docs.iter() {
                if matching.eval(doc.fields())? {
                    deleted.push(doc.id());
                }
            }
            docs.retain(|doc| !deleted.contains(&doc.id()));

            debug!(table = %self.name, deleted = deleted.len(), "documents deleted");
            Ok(deleted)
        })
    }

    /// Delete the given ids.
    ///
    /// Fails with `NotFound`, deleting nothing, if any id is absent.
    pub fn delete_by_ids(&self, ids: &[DocId]) -> Result<Vec<DocId>, Error> {
        let mut wanted: Vec<DocId> = Vec::with_capacity(ids.len());
        for &id in ids {
            if !wanted.contains(&id) {
                wanted.push(id);
            }
        }

        self.modify(|docs| {
            if let Some(&missing) = wanted.iter().find(|id| !docs.iter().any(|doc| doc.id() == **id)) {
                return Err(TableError::NotFound {
                    table: self.name.clone(),
                    id: missing,
                }
                .into());
            }
            docs.retain(|doc| !wanted.contains(&doc.id()));

            debug!(table = %self.name, deleted = wanted.len(), "documents deleted by id");
            Ok(wanted.clone())
        })
    }

    /// Documents matching `matching`, in stored order.
    pub fn search(&self, matching: &Predicate) -> Result<Vec<Document>, Error> {
        let mut found = Vec::new();
        for doc in self.read()? {
            if matching.eval(doc.fields())? {
                found.push(doc);
            }
        }
        Ok(found)
    }

    pub fn get_all(&self) -> Result<Vec<Document>, Error> {
        self.search(&Predicate::always())
    }

    /// Declare `field` as an additional primary-key field.
    ///
    /// Documents lacking the field are backfilled with the key placeholder.
    /// Declaring an already-declared field only repeats the backfill.
    pub fn add_key(&self, field: &str) -> Result<(), Error> {
        self.add_key_with(field, |_| {})
    }

    /// [`Table::add_key`], applying `record` to the store document in the
    /// same write as the backfill. The key is registered on this handle only
    /// once that write succeeds.
    pub(crate) fn add_key_with<G>(&self, field: &str, record: G) -> Result<(), Error>
    where
        G: FnOnce(&mut StoreDocument),
    {
        let backfill = |docs: &mut Vec<Document>| -> Result<usize, Error> {
            let mut filled = 0usize;
            for doc in docs.iter_mut() {
                if !doc.fields().contains_key(field) {
                    doc.fields_mut().insert(field.to_string(), KEY_PLACEHOLDER);
                    filled += 1;
                }
            }
            Ok(filled)
        };
        let filled = self.modify_with(backfill, record)?;

        let mut keys = self.keys.write();
        if !keys.iter().any(|k| k == field) {
            keys.push(field.to_string());
        }
        debug!(table = %self.name, field, filled, "key field registered");
        Ok(())
    }

    /// Remove every document and restart id allocation at 1.
    ///
    /// Declared key fields are kept.
    pub fn reset(&self) -> Result<(), Error> {
        self.modify(|docs| {
            docs.clear();
            Ok(())
        })?;
        *self.ids.lock() = IdAllocator::default();
        debug!(table = %self.name, "table reset");
        Ok(())
    }

    /// Run one read-modify-write cycle over this table's snapshot.
    fn modify<F, R>(&self, mutate: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Vec<Document>) -> Result<R, Error>,
    {
        self.modify_with(mutate, |_| {})
    }

    /// [`Table::modify`] with a final edit to the rest of the store document
    /// before the write.
    fn modify_with<F, G, R>(&self, mutate: F, finish: G) -> Result<R, Error>
    where
        F: FnOnce(&mut Vec<Document>) -> Result<R, Error>,
        G: FnOnce(&mut StoreDocument),
    {
        let mut store_doc = self.store.read()?;
        let mut docs = self.snapshot(&store_doc);
        let before = docs.len();

        let out = mutate(&mut docs)?;

        debug!(table = %self.name, before, after = docs.len(), "writing table snapshot");
        store_doc.insert(self.name.clone(), Value::Object(to_table_entry(&docs)));
        finish(&mut store_doc);
        self.store.write(&store_doc)?;
        Ok(out)
    }

    /// Copy this table's entry out of the store document.
    fn snapshot(&self, store_doc: &StoreDocument) -> Vec<Document> {
        let entries = match store_doc.get(&self.name) {
            None => return Vec::new(),
            Some(Value::Object(entries)) => entries,
            Some(_) => {
                warn!(table = %self.name, "table entry is not an object, treating as empty");
                return Vec::new();
            }
        };

        entries
            .iter()
            .filter_map(|(key, value)| {
                let Ok(id) = key.parse::<DocId>() else {
                    warn!(table = %self.name, key = %key, "skipping document with non-numeric id");
                    return None;
                };
                let Value::Object(fields) = value else {
                    warn!(table = %self.name, id, "skipping document that is not an object");
                    return None;
                };
                Some(Document::new(id, fields.clone()))
            })
            .collect()
    }
}

fn to_table_entry(docs: &[Document]) -> Map<String, Value> {
    docs.iter()
        .map(|doc| (doc.id().to_string(), doc.to_value()))
        .collect()
}

fn into_fields(document: Value) -> Result<Fields, Error> {
    match document {
        Value::Object(fields) => Ok(fields),
        other => Err(TableError::InvalidDocument(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))
        .into()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
