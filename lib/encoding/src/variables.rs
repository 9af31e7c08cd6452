//! Deterministic variable naming.
//!
//! Every variable that the query compiler emits is a function of a property path and a
//! [VariableRole]. Path segments are joined with [PATH_SEPARATOR], a character that SPARQL allows
//! inside variable names but that property names cannot contain. This lets the result decoder map
//! every output column back to its field path.
//!
//! Output variables are named after their field, so they never start with `_` (except `_id` and
//! `_type`). All other roles are prefixed with `_` and a role tag.

use rdf_odm_model::{OdmResult, Variable, ID_FIELD, TYPE_FIELD};

/// Joins the segments of a path inside a variable name (`U+00B7 MIDDLE DOT`).
pub const PATH_SEPARATOR: char = '\u{b7}';

/// The name of the root subject variable.
pub const ROOT_VARIABLE: &str = "_root";

/// The purpose of a variable within a compiled query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariableRole {
    /// A projected column, named after a field or an aggregate.
    Output,
    /// The object of the triple pattern that reaches a path.
    Node,
    /// The URI-encoded form of a value that is packed into an array.
    Encoded,
    /// The raw `GROUP_CONCAT` result before it is wrapped into an array.
    Packed,
    /// A private variable of the n-th filter.
    Filter(usize),
}

impl VariableRole {
    fn tag(self) -> Option<String> {
        match self {
            VariableRole::Output => None,
            VariableRole::Node => Some("_p".to_owned()),
            VariableRole::Encoded => Some("_e".to_owned()),
            VariableRole::Packed => Some("_g".to_owned()),
            VariableRole::Filter(idx) => Some(format!("_filter{idx}")),
        }
    }
}

/// Returns the name of the variable with `role` for the path made of `segments`.
pub fn variable_name<S: AsRef<str>>(role: VariableRole, segments: &[S]) -> String {
    let separator = PATH_SEPARATOR.to_string();
    let joined = segments
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(&separator);

    match (role.tag(), joined.is_empty()) {
        (None, _) => joined,
        (Some(_), true) if role == VariableRole::Node => ROOT_VARIABLE.to_owned(),
        (Some(tag), true) => tag,
        (Some(tag), false) => format!("{tag}{PATH_SEPARATOR}{joined}"),
    }
}

/// The variable bound to the root document.
pub fn root_variable() -> Variable {
    Variable::new_unchecked(ROOT_VARIABLE)
}

/// Like [variable_name], but validates the name as a SPARQL variable.
pub fn variable<S: AsRef<str>>(role: VariableRole, segments: &[S]) -> OdmResult<Variable> {
    Ok(Variable::new(variable_name(role, segments))?)
}

/// The output variable of a field, which may be dotted to request a nested result.
pub fn output_variable(field: &str) -> OdmResult<Variable> {
    let segments = field.split('.').collect::<Vec<_>>();
    variable(VariableRole::Output, &segments)
}

/// Inverts the naming of output variables.
///
/// Returns `None` for the internal variables of all other roles.
pub fn output_segments(name: &str) -> Option<Vec<&str>> {
    if name.starts_with('_') && name != ID_FIELD && name != TYPE_FIELD {
        return None;
    }
    Some(name.split(PATH_SEPARATOR).collect())
}
