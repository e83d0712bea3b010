//! Error types for all jsondb operations.

use std::io;
use thiserror::Error;

use crate::types::DocId;

/// Top-level error type for jsondb operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(serde_json::Error),

    /// Only returned by `JsonStore::read_strict`; `read` recovers to `{}`.
    #[error("malformed store content: {0}")]
    Malformed(serde_json::Error),

    #[error("store content is valid JSON but not an object")]
    NotAnObject,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("document {id} already exists in table '{table}'")]
    DuplicateId { table: String, id: DocId },

    #[error("primary key {keys:?} of table '{table}' collides with document {conflicting_id}")]
    ConstraintViolation {
        table: String,
        keys: Vec<String>,
        conflicting_id: DocId,
    },

    #[error("document {id} not found in table '{table}'")]
    NotFound { table: String, id: DocId },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("cannot append to field '{field}': both values must be arrays")]
    AppendTypeMismatch { field: String },

    #[error("no ids left to allocate in table '{table}'")]
    IdSpaceExhausted { table: String },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no field path was set")]
    EmptyPath,

    #[error("empty query was evaluated")]
    EmptyQuery,

    #[error("invalid regex: {0}")]
    InvalidRegex(String),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table name '{0}' is reserved")]
    ReservedTableName(String),

    #[error("table not found: {0}")]
    TableNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
