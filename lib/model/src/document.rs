use crate::{OdmError, OdmResult};
use serde_json::{Map, Value};

/// The key holding the identifier of a document.
pub const ID_FIELD: &str = "_id";
/// The key holding the model name of a document.
pub const TYPE_FIELD: &str = "_type";

/// A caller-facing, arbitrarily nested document.
///
/// Every persisted document carries an `_id` and a `_type`. All other keys match the property names
/// of its model.
pub type Document = Map<String, Value>;

/// The identity of a document: its model and its identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DocumentIdentity<'doc> {
    pub model: &'doc str,
    pub id: &'doc str,
}

impl<'doc> DocumentIdentity<'doc> {
    /// Extracts the identity of `document`.
    ///
    /// Fails with [OdmError::MissingIdentity] if `_id` or `_type` is absent or not a string.
    pub fn of(document: &'doc Document) -> OdmResult<Self> {
        let id = document.get(ID_FIELD).and_then(Value::as_str);
        let model = document.get(TYPE_FIELD).and_then(Value::as_str);
        match (model, id) {
            (Some(model), Some(id)) if !model.is_empty() && !id.is_empty() => {
                Ok(Self { model, id })
            }
            _ => Err(OdmError::MissingIdentity),
        }
    }
}

/// Inserts `value` at the nested location described by `path`, creating intermediate objects as
/// needed.
///
/// Existing non-object values along the path are replaced.
pub fn insert_nested(document: &mut Document, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = document;
    for parent in parents {
        let entry = current
            .entry((*parent).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(next) => next,
            _ => return,
        };
    }
    current.insert((*last).to_owned(), value);
}
