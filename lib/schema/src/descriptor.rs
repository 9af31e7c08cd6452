use rdf_odm_model::NamedNode;
use std::fmt::{Display, Formatter};

/// The kind of a scalar (non-relation) property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Number,
    Boolean,
    /// Dates and date-times. Both are normalized to an `xsd:dateTime` with millisecond precision.
    Date,
}

impl ScalarKind {
    /// Parses the name used in configurations (`string`, `number`, `boolean`, `date`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "date" | "datetime" => Some(Self::Date),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
        }
    }
}

impl Display for ScalarKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a property points at.
///
/// The variants are resolved once when the schema is built. Compilers match on them instead of
/// probing the shape of a property at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// A literal value.
    Scalar(ScalarKind),
    /// A stored reference to an instance of `model`.
    Relation { model: String },
    /// The set of instances of `model` whose `property` points at the owner of this property.
    ///
    /// Inverse relations have no stored predicate of their own.
    InverseRelation { model: String, property: String },
}

/// One schema property, resolved for a model.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropertyDescriptor {
    name: String,
    /// For inverse relations this is the predicate of the originating property.
    predicate: NamedNode,
    kind: PropertyKind,
    array: bool,
}

impl PropertyDescriptor {
    pub(crate) fn new(name: String, predicate: NamedNode, kind: PropertyKind, array: bool) -> Self {
        Self {
            name,
            predicate,
            kind,
            array,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The predicate that stores this property.
    ///
    /// For an inverse relation, triples with this predicate point *at* the owner of the property.
    pub fn predicate(&self) -> &NamedNode {
        &self.predicate
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub fn is_array(&self) -> bool {
        self.array
    }

    /// Returns true for both forward and inverse relations.
    pub fn is_relation(&self) -> bool {
        !matches!(self.kind, PropertyKind::Scalar(_))
    }

    pub fn is_inverse(&self) -> bool {
        matches!(self.kind, PropertyKind::InverseRelation { .. })
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match &self.kind {
            PropertyKind::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    /// The model at the other end of a relation.
    pub fn related_model(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Scalar(_) => None,
            PropertyKind::Relation { model } | PropertyKind::InverseRelation { model, .. } => {
                Some(model)
            }
        }
    }

    /// The `(model, property)` that an inverse relation originates from.
    pub fn inverse_origin(&self) -> Option<(&str, &str)> {
        match &self.kind {
            PropertyKind::InverseRelation { model, property } => Some((model, property)),
            _ => None,
        }
    }
}
