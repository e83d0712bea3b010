//! Value comparison and the hashable canonical form of JSON values.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde_json::{Number, Value};

/// 2^127: floats at or beyond this magnitude do not fit an `i128`.
const I128_LIMIT: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

/// Compare two JSON values, returning an ordering if the types are comparable.
///
/// - Numbers: integers (and floats with an integral value) compared exactly,
///   anything else as f64
/// - Strings: compared lexicographically
/// - Booleans: false < true
/// - Null == Null
/// - Arrays: lexicographic, element by element
/// - Objects and mismatched types: `None`
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match compare_values(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

/// Structural equality with numbers compared by value (`1 == 1.0`).
///
/// Values of different JSON types are never equal.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => left == right,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    match (exact_integer(a), exact_integer(b)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        // A non-integral float is below 2^53 in magnitude, where f64 is exact
        // enough to order it against any integer.
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// The exact integer value of a number, if it has one.
fn exact_integer(n: &Number) -> Option<i128> {
    if let Some(i) = n.as_i64() {
        return Some(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(i128::from(u));
    }
    integral_float(n.as_f64()?)
}

fn integral_float(f: f64) -> Option<i128> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < I128_LIMIT {
        Some(f as i128)
    } else {
        None
    }
}

/// A number normalised so that equal values hash and order identically.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalNumber(f64);

impl CanonicalNumber {
    pub fn new(value: f64) -> Self {
        // -0.0 == 0.0, so both must share one representation.
        if value == 0.0 {
            Self(0.0)
        } else {
            Self(value)
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for CanonicalNumber {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for CanonicalNumber {}

impl PartialOrd for CanonicalNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for CanonicalNumber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Immutable, hashable, totally ordered mirror of a JSON value.
///
/// Objects become sorted maps and arrays become sequences, so two values
/// that compare equal under [`values_equal`] have equal canonical forms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashableValue {
    Null,
    Bool(bool),
    /// Integers and integral floats, so `1` and `1.0` share one form.
    Int(i128),
    /// Every other float.
    Number(CanonicalNumber),
    String(String),
    Array(Vec<HashableValue>),
    Object(BTreeMap<String, HashableValue>),
}

impl From<&Value> for HashableValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => HashableValue::Null,
            Value::Bool(b) => HashableValue::Bool(*b),
            Value::Number(n) => match exact_integer(n) {
                Some(i) => HashableValue::Int(i),
                None => HashableValue::Number(CanonicalNumber::new(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => HashableValue::String(s.clone()),
            Value::Array(items) => HashableValue::Array(items.iter().map(HashableValue::from).collect()),
            Value::Object(map) => HashableValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), HashableValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl HashableValue {
    /// Append a stable, type-tagged byte encoding of this value.
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        match self {
            HashableValue::Null => out.push(0),
            HashableValue::Bool(b) => {
                out.push(1);
                out.push(u8::from(*b));
            }
            HashableValue::Number(n) => {
                out.push(2);
                out.extend_from_slice(&n.get().to_bits().to_le_bytes());
            }
            HashableValue::Int(i) => {
                out.push(6);
                out.extend_from_slice(&i.to_le_bytes());
            }
            HashableValue::String(s) => {
                out.push(3);
                encode_str(s, out);
            }
            HashableValue::Array(items) => {
                out.push(4);
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.encode(out);
                }
            }
            HashableValue::Object(map) => {
                out.push(5);
                out.extend_from_slice(&(map.len() as u64).to_le_bytes());
                for (k, v) in map {
                    encode_str(k, out);
                    v.encode(out);
                }
            }
        }
    }
}

/// Length-prefixed string encoding shared by canonical key encoders.
pub(crate) fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}
