//! Primary-key projection and conflict detection.

use serde_json::Value;

use crate::query::value::values_equal;
use crate::types::{DocId, Document, Fields};

/// Project `fields` onto the declared key fields.
///
/// Returns `None` when there are no key fields or any key field is
/// undefined (absent or `null`); such documents never conflict.
pub fn project<'a>(fields: &'a Fields, keys: &[String]) -> Option<Vec<&'a Value>> {
    if keys.is_empty() {
        return None;
    }
    keys.iter()
        .map(|k| fields.get(k).filter(|v| !v.is_null()))
        .collect()
}

/// Find a document (other than `skip`) whose key projection equals the
/// candidate's.
pub fn find_conflict(
    docs: &[Document],
    candidate: &Fields,
    keys: &[String],
    skip: Option<DocId>,
) -> Option<DocId> {
    let wanted = project(candidate, keys)?;

    docs.iter()
        .filter(|doc| Some(doc.id()) != skip)
        .find(|doc| {
            project(doc.fields(), keys).is_some_and(|have| {
                have.iter().zip(wanted.iter()).all(|(a, b)| values_equal(a, b))
            })
        })
        .map(Document::id)
}
