//! Storage: the single JSON file holding every table.

pub mod file;

pub use file::{JsonStore, StoreOptions, SyncMode, WriteMode};
