//! Public API: the database handle mapping table names to tables.

pub mod database;

pub use database::JsonDatabase;
