//! Core types: document identifiers, documents, the persisted store document.

use serde::Serialize;
use serde_json::{Map, Value};

/// Document identifier, unique within a table and immutable once assigned.
///
/// Persisted as a decimal string key; allocation compares ids numerically.
pub type DocId = u64;

/// The whole persisted value: table name to table content, plus `__params__`.
pub type StoreDocument = Map<String, Value>;

/// Field/value content of a single document.
pub type Fields = Map<String, Value>;

/// Reserved table holding every table's declared key fields.
pub const PARAMS_TABLE: &str = "__params__";

/// Field name inside a `__params__` entry listing the declared key fields.
pub const PARAMS_KEYS_FIELD: &str = "keys";

/// Value written into documents lacking a newly registered key field.
///
/// A key field holding this value is treated as undefined by the uniqueness
/// projection, so backfilled documents never conflict with one another.
pub const KEY_PLACEHOLDER: Value = Value::Null;

/// A document stored in a table: its content paired with its identifier.
///
/// Serializes as its content alone; the id lives in the table entry key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    #[serde(skip)]
    id: DocId,
    #[serde(flatten)]
    fields: Fields,
}

impl Document {
    pub fn new(id: DocId, fields: Fields) -> Self {
        Self { id, fields }
    }

    /// Build a document from a JSON value, which must be an object.
    pub fn from_value(id: DocId, value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { id, fields }),
            _ => None,
        }
    }

    pub fn id(&self) -> DocId {
        self.id
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Fields {
        &mut self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The document content as a JSON object, without the id.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}
