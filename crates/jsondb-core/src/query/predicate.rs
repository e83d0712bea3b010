//! Predicate trees: evaluation, logical combinators and canonical keys.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde_json::Value;
use xxhash_rust::xxh64::Xxh64;

use crate::error::QueryError;
use crate::types::Fields;

use super::value::{compare_values, encode_str, values_equal, HashableValue};

/// A caller-supplied test run against the value a field path resolves to.
///
/// Identity (for canonical keys) is the allocation behind the `Arc`, so
/// clones of one `TestFn` produce equal predicates.
pub type TestFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Ordering comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    fn apply(self, actual: &Value, expected: &Value) -> bool {
        use std::cmp::Ordering;

        match self {
            CompareOp::Eq => values_equal(actual, expected),
            CompareOp::Ne => !values_equal(actual, expected),
            CompareOp::Lt => compare_values(actual, expected) == Some(Ordering::Less),
            CompareOp::Le => matches!(
                compare_values(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            CompareOp::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
            CompareOp::Ge => matches!(
                compare_values(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// A compiled regular expression together with its source and flags.
#[derive(Debug, Clone)]
pub struct RegexTest {
    pattern: String,
    flags: String,
    regex: Regex,
}

impl RegexTest {
    /// Compile `pattern` with optional flags.
    ///
    /// Supported flags: i (case-insensitive), m (multiline), s (dot-all),
    /// x (ignore whitespace). Unknown flags are an error, not ignored.
    pub fn new(pattern: &str, flags: &str) -> Result<Self, QueryError> {
        let mut builder = RegexBuilder::new(pattern);
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                c => {
                    return Err(QueryError::InvalidRegex(format!("unknown regex flag: '{c}'")));
                }
            }
        }
        let regex = builder
            .build()
            .map_err(|e| QueryError::InvalidRegex(e.to_string()))?;

        // Flags are canonicalised so "mi" and "im" share one identity.
        let mut sorted: Vec<char> = flags.chars().collect();
        sorted.sort_unstable();
        sorted.dedup();

        Ok(Self {
            pattern: pattern.to_string(),
            flags: sorted.into_iter().collect(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }
}

/// The test a leaf predicate applies to its resolved value.
#[derive(Clone)]
pub enum FieldTest {
    Compare(CompareOp, Value),
    Exists,
    Search(RegexTest),
    Custom(TestFn),
}

impl FieldTest {
    fn check(&self, value: &Value) -> bool {
        match self {
            FieldTest::Compare(op, expected) => op.apply(value, expected),
            FieldTest::Exists => true,
            FieldTest::Search(re) => value.as_str().is_some_and(|s| re.regex.is_match(s)),
            FieldTest::Custom(func) => func(value),
        }
    }
}

impl fmt::Debug for FieldTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldTest::Compare(op, v) => write!(f, "{} {v}", op.symbol()),
            FieldTest::Exists => f.write_str("exists()"),
            FieldTest::Search(re) => write!(f, "search({:?}, {:?})", re.pattern, re.flags),
            FieldTest::Custom(func) => write!(f, "test({:p})", Arc::as_ptr(func)),
        }
    }
}

/// An immutable node in a boolean expression over one document.
///
/// Equality and hashing go through [`Predicate::key`], so two trees built
/// from the same paths, operators and values are equal regardless of where
/// they were built. Only syntactic identity is tracked: `!(a | b)` and
/// `!a & !b` are different predicates.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Matches every document.
    Always,
    /// A field path with no test attached; evaluating it is an error.
    Path(Vec<String>),
    /// A test applied to the value at `path`.
    Field { path: Vec<String>, test: FieldTest },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// The always-true predicate.
    pub fn always() -> Self {
        Predicate::Always
    }

    /// Evaluate against a document's fields.
    ///
    /// Leaves whose path does not resolve evaluate to `false`. The only
    /// error is evaluating an incomplete query.
    pub fn eval(&self, doc: &Fields) -> Result<bool, QueryError> {
        match self {
            Predicate::Always => Ok(true),
            Predicate::Path(_) => Err(QueryError::EmptyQuery),
            Predicate::Field { path, test } => Ok(resolve_path(doc, path).is_some_and(|v| test.check(v))),
            Predicate::And(a, b) => Ok(a.eval(doc)? && b.eval(doc)?),
            Predicate::Or(a, b) => Ok(a.eval(doc)? || b.eval(doc)?),
            Predicate::Not(a) => Ok(!a.eval(doc)?),
        }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// The canonical structural key of this tree.
    pub fn key(&self) -> QueryKey {
        match self {
            Predicate::Always => QueryKey::Always,
            Predicate::Path(path) if path.is_empty() => QueryKey::Empty,
            Predicate::Path(path) => QueryKey::FieldPath(path.clone()),
            Predicate::Field { path, test } => match test {
                FieldTest::Compare(op, v) => QueryKey::Compare {
                    op: *op,
                    path: path.clone(),
                    value: HashableValue::from(v),
                },
                FieldTest::Exists => QueryKey::Exists { path: path.clone() },
                FieldTest::Search(re) => QueryKey::Search {
                    path: path.clone(),
                    pattern: re.pattern.clone(),
                    flags: re.flags.clone(),
                },
                FieldTest::Custom(func) => QueryKey::Test {
                    path: path.clone(),
                    func: Arc::as_ptr(func) as *const () as usize,
                },
            },
            Predicate::And(a, b) => QueryKey::And([a.key(), b.key()].into_iter().collect()),
            Predicate::Or(a, b) => QueryKey::Or([a.key(), b.key()].into_iter().collect()),
            Predicate::Not(a) => QueryKey::Not(Box::new(a.key())),
        }
    }

    /// 64-bit xxHash digest of the canonical key.
    ///
    /// Stable across processes except for trees containing custom test
    /// functions, whose identity is a process-local address.
    pub fn fingerprint(&self) -> u64 {
        let mut buf = Vec::new();
        self.key().encode(&mut buf);
        let mut hasher = Xxh64::new(0);
        hasher.update(&buf);
        hasher.digest()
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Predicate {}

impl Hash for Predicate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        self.and(rhs)
    }
}

impl BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Predicate) -> Predicate {
        self.or(rhs)
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

/// Canonical identity of a predicate tree.
///
/// AND/OR operands are held in a set, so operand order does not matter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryKey {
    Always,
    Empty,
    FieldPath(Vec<String>),
    Compare {
        op: CompareOp,
        path: Vec<String>,
        value: HashableValue,
    },
    Exists {
        path: Vec<String>,
    },
    Search {
        path: Vec<String>,
        pattern: String,
        flags: String,
    },
    Test {
        path: Vec<String>,
        func: usize,
    },
    And(BTreeSet<QueryKey>),
    Or(BTreeSet<QueryKey>),
    Not(Box<QueryKey>),
}

impl QueryKey {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            QueryKey::Always => out.push(0),
            QueryKey::Empty => out.push(1),
            QueryKey::FieldPath(path) => {
                out.push(2);
                encode_path(path, out);
            }
            QueryKey::Compare { op, path, value } => {
                out.push(3);
                encode_str(op.symbol(), out);
                encode_path(path, out);
                value.encode(out);
            }
            QueryKey::Exists { path } => {
                out.push(4);
                encode_path(path, out);
            }
            QueryKey::Search { path, pattern, flags } => {
                out.push(5);
                encode_path(path, out);
                encode_str(pattern, out);
                encode_str(flags, out);
            }
            QueryKey::Test { path, func } => {
                out.push(6);
                encode_path(path, out);
                out.extend_from_slice(&(*func as u64).to_le_bytes());
            }
            QueryKey::And(keys) | QueryKey::Or(keys) => {
                out.push(if matches!(self, QueryKey::And(_)) { 7 } else { 8 });
                out.extend_from_slice(&(keys.len() as u64).to_le_bytes());
                for key in keys {
                    key.encode(out);
                }
            }
            QueryKey::Not(inner) => {
                out.push(9);
                inner.encode(out);
            }
        }
    }
}

fn encode_path(path: &[String], out: &mut Vec<u8>) {
    out.extend_from_slice(&(path.len() as u64).to_le_bytes());
    for segment in path {
        encode_str(segment, out);
    }
}

/// Descend `path` through nested objects.
///
/// Returns `None` if a segment is missing or an intermediate value is not
/// an object.
pub fn resolve_path<'a>(doc: &'a Fields, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = doc.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
