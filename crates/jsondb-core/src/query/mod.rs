//! Query builder: field paths, leaf predicates and their combinators.
//!
//! Predicates are pure in-memory values; they never touch the store.
//!
//! ```
//! use jsondb_core::query::field;
//! use serde_json::json;
//!
//! let adult_alice = field("name").eq("Alice").unwrap() & field("age").ge(18).unwrap();
//! let doc = json!({"name": "Alice", "age": 30});
//! assert!(adult_alice.eval(doc.as_object().unwrap()).unwrap());
//! ```

pub mod predicate;
pub mod value;

use std::sync::Arc;

use serde_json::Value;

use crate::error::QueryError;

pub use predicate::{CompareOp, FieldTest, Predicate, QueryKey, RegexTest, TestFn};

/// Start a query at the top-level field `name`.
pub fn field(name: impl Into<String>) -> Query {
    Query::new().field(name)
}

/// An immutable field-path builder.
///
/// Each access returns a new builder; attaching a test yields a
/// [`Predicate`]. Leaf constructors fail with [`QueryError::EmptyPath`]
/// when no path has been set.
#[derive(Debug, Clone, Default)]
pub struct Query {
    path: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Descend into `name`.
    pub fn field(&self, name: impl Into<String>) -> Query {
        let mut path = self.path.clone();
        path.push(name.into());
        Query { path }
    }

    /// Alias of [`Query::field`] for subscript-style paths.
    pub fn index(&self, name: impl Into<String>) -> Query {
        self.field(name)
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    fn leaf(&self, test: FieldTest) -> Result<Predicate, QueryError> {
        if self.path.is_empty() {
            return Err(QueryError::EmptyPath);
        }
        Ok(Predicate::Field {
            path: self.path.clone(),
            test,
        })
    }

    fn compare(&self, op: CompareOp, value: impl Into<Value>) -> Result<Predicate, QueryError> {
        self.leaf(FieldTest::Compare(op, value.into()))
    }

    /// `path == value`
    #[allow(clippy::should_implement_trait)]
    pub fn eq(&self, value: impl Into<Value>) -> Result<Predicate, QueryError> {
        self.compare(CompareOp::Eq, value)
    }

    /// `path != value`; false when the path does not resolve.
    #[allow(clippy::should_implement_trait)]
    pub fn ne(&self, value: impl Into<Value>) -> Result<Predicate, QueryError> {
        self.compare(CompareOp::Ne, value)
    }

    /// `path < value`
    pub fn lt(&self, value: impl Into<Value>) -> Result<Predicate, QueryError> {
        self.compare(CompareOp::Lt, value)
    }

    /// `path <= value`
    pub fn le(&self, value: impl Into<Value>) -> Result<Predicate, QueryError> {
        self.compare(CompareOp::Le, value)
    }

    /// `path > value`
    pub fn gt(&self, value: impl Into<Value>) -> Result<Predicate, QueryError> {
        self.compare(CompareOp::Gt, value)
    }

    /// `path >= value`
    pub fn ge(&self, value: impl Into<Value>) -> Result<Predicate, QueryError> {
        self.compare(CompareOp::Ge, value)
    }

    /// The path resolves to any value, `null` included.
    pub fn exists(&self) -> Result<Predicate, QueryError> {
        self.leaf(FieldTest::Exists)
    }

    /// The resolved value is a string containing a match for `pattern`.
    pub fn search(&self, pattern: &str, flags: &str) -> Result<Predicate, QueryError> {
        if self.path.is_empty() {
            return Err(QueryError::EmptyPath);
        }
        self.leaf(FieldTest::Search(RegexTest::new(pattern, flags)?))
    }

    /// The resolved value satisfies `func`.
    pub fn test(&self, func: TestFn) -> Result<Predicate, QueryError> {
        self.leaf(FieldTest::Custom(func))
    }

    /// Wrap a closure into a fresh [`TestFn`]; every call has a new identity.
    pub fn test_with<F>(&self, func: F) -> Result<Predicate, QueryError>
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.test(Arc::new(func))
    }
}

impl From<Query> for Predicate {
    /// An incomplete query: evaluating it fails with `EmptyQuery`.
    fn from(query: Query) -> Self {
        Predicate::Path(query.path)
    }
}
