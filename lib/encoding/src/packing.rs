//! Packing of array values into a single result column.
//!
//! A query returns one row per group, so array fields are folded with `GROUP_CONCAT`. Every
//! element is percent-encoded (`ENCODE_FOR_URI`) before it is concatenated. The packed column is
//! therefore a JSON document whose strings only contain unreserved characters and `%XX` escapes,
//! no matter which characters the values contain.
//!
//! - Value arrays are packed as `["a", "b%22c"]`.
//! - Object arrays are packed as `[{"k":"v"},{"k":"w"}]`, where each object has been built per
//!   solution before grouping.

use rdf_odm_model::{OdmError, OdmResult};
use serde_json::{Map, Value};

/// How an array column is packed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArrayPacking {
    /// An array of scalars or relation URIs.
    Values,
    /// An array of embedded objects with scalar members.
    Objects,
}

impl ArrayPacking {
    /// The text placed before the concatenated elements.
    pub fn open(self) -> &'static str {
        match self {
            Self::Values => "[\"",
            Self::Objects => "[",
        }
    }

    /// The `GROUP_CONCAT` separator.
    pub fn separator(self) -> &'static str {
        match self {
            Self::Values => "\", \"",
            Self::Objects => ",",
        }
    }

    /// The text placed after the concatenated elements.
    pub fn close(self) -> &'static str {
        match self {
            Self::Values => "\"]",
            Self::Objects => "]",
        }
    }
}

/// The literal text that precedes the encoded value of the `index`-th member of a packed object.
pub fn object_member_prefix(index: usize, key: &str) -> String {
    let key = Value::String(key.to_owned());
    if index == 0 {
        format!("{{{key}:\"")
    } else {
        format!("\",{key}:\"")
    }
}

/// The literal text that closes a packed object.
pub const OBJECT_SUFFIX: &str = "\"}";

/// Unpacks a value array. Elements are percent-decoded.
///
/// Empty elements are dropped. They stand for a group without values, or for values that encode
/// to nothing. Whitespace is encoded, so an element holding only spaces is kept.
pub fn unpack_values(path: &str, packed: &str) -> OdmResult<Vec<String>> {
    let elements: Vec<String> = serde_json::from_str(packed)
        .map_err(|e| malformed(path, &e.to_string()))?;
    elements
        .iter()
        .filter(|element| !element.is_empty())
        .map(|element| percent_decode(path, element))
        .collect()
}

/// Unpacks an object array. Blank members are dropped, as are objects without any member.
pub fn unpack_objects(path: &str, packed: &str) -> OdmResult<Vec<Map<String, Value>>> {
    let elements: Vec<Map<String, Value>> = serde_json::from_str(packed)
        .map_err(|e| malformed(path, &e.to_string()))?;

    let mut objects = Vec::with_capacity(elements.len());
    for element in elements {
        let mut object = Map::new();
        for (key, member) in element {
            let Value::String(encoded) = member else {
                return Err(malformed(path, "object members must be strings"));
            };
            let decoded = percent_decode(path, &encoded)?;
            if !decoded.is_empty() {
                object.insert(key, Value::String(decoded));
            }
        }
        if !object.is_empty() {
            objects.push(object);
        }
    }
    Ok(objects)
}

fn percent_decode(path: &str, encoded: &str) -> OdmResult<String> {
    urlencoding::decode(encoded)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| malformed(path, &e.to_string()))
}

fn malformed(path: &str, reason: &str) -> OdmError {
    OdmError::InvalidValue {
        path: path.to_owned(),
        reason: format!("malformed packed array: {reason}"),
    }
}
