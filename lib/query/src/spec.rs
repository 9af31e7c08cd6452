use crate::condition::Condition;
use rdf_odm_model::{OdmError, OdmResult, ID_FIELD, TYPE_FIELD};
use rdf_odm_schema::{PathStep, PropertyDescriptor, PropertyPath, PropertyResolver};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// The marker that makes a path segment, and all segments after it, optional.
pub const OPTIONAL_MARKER: char = '?';

/// A declarative query against the documents of one model.
///
/// Field and aggregate names become the keys of the decoded documents. Dotted names (`author.name`)
/// produce nested objects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuerySpec {
    pub fields: BTreeMap<String, FieldSelector>,
    pub filter: Option<Condition>,
    pub aggregates: BTreeMap<String, Aggregation>,
    pub sort: Vec<SortDirective>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub distinct: bool,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Projects the property at `path` into the field `name`.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, path: &str) -> Self {
        self.fields
            .insert(name.into(), FieldSelector::Scalar(FieldPath::parse(path)));
        self
    }

    /// Projects all values of the property at `path` into the array field `name`.
    #[must_use]
    pub fn array_field(mut self, name: impl Into<String>, path: &str) -> Self {
        self.fields
            .insert(name.into(), FieldSelector::Array(FieldPath::parse(path)));
        self
    }

    #[must_use]
    pub fn selector(mut self, name: impl Into<String>, selector: FieldSelector) -> Self {
        self.fields.insert(name.into(), selector);
        self
    }

    #[must_use]
    pub fn aggregate(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        self.aggregates.insert(name.into(), aggregation);
        self
    }

    /// Adds `condition` to the filter. Multiple conditions must all hold.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter = Some(match self.filter.take() {
            None => condition,
            Some(Condition::And(mut conditions)) => {
                conditions.push(condition);
                Condition::And(conditions)
            }
            Some(existing) => Condition::And(vec![existing, condition]),
        });
        self
    }

    /// Sorts by a field or aggregate name. A leading `-` sorts descending.
    #[must_use]
    pub fn sort(mut self, directive: &str) -> Self {
        self.sort.push(SortDirective::parse(directive));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    /// The direction in which `name` is sorted, if it is sorted at all.
    pub fn sort_direction(&self, name: &str) -> Option<SortDirection> {
        self.sort
            .iter()
            .find(|directive| directive.target == name)
            .map(|directive| directive.direction)
    }

    /// The spec that is actually compiled and decoded for documents of `model`.
    ///
    /// A scalar selector whose path passes through an array property becomes an array selector,
    /// since it can reach many values. A spec that projects nothing projects `_id`.
    pub fn normalized(&self, resolver: &dyn PropertyResolver, model: &str) -> OdmResult<Self> {
        let mut spec = self.clone();
        if spec.fields.is_empty() && spec.aggregates.is_empty() {
            spec.fields.insert(
                ID_FIELD.to_owned(),
                FieldSelector::Scalar(FieldPath::parse(ID_FIELD)),
            );
        }
        for selector in spec.fields.values_mut() {
            let FieldSelector::Scalar(path) = &*selector else {
                continue;
            };
            let multi_valued = resolver
                .resolve_path(model, path.path())?
                .steps()
                .iter()
                .filter_map(PathStep::property)
                .any(PropertyDescriptor::is_array);
            if multi_valued {
                *selector = FieldSelector::Array(path.clone());
            }
        }
        Ok(spec)
    }

    /// Checks that every output name can become a document key.
    ///
    /// Names are dotted identifiers. Only `_id` and `_type` may start with an underscore.
    pub fn validate_names(&self) -> OdmResult<()> {
        for name in self.fields.keys().chain(self.aggregates.keys()) {
            validate_output_name(name)?;
        }
        if let Some(name) = self
            .fields
            .keys()
            .find(|name| self.aggregates.contains_key(*name))
        {
            return OdmError::invalid_query(format!(
                "'{name}' is both a field and an aggregate"
            ));
        }
        Ok(())
    }
}

fn validate_output_name(name: &str) -> OdmResult<()> {
    let valid_segment = |segment: &str| {
        segment == ID_FIELD
            || segment == TYPE_FIELD
            || (segment.starts_with(|c: char| c.is_ascii_alphabetic())
                && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
    };
    if name.split('.').all(valid_segment) {
        Ok(())
    } else {
        OdmError::invalid_query(format!("'{name}' is not a valid field name"))
    }
}

/// A property path as written in a query, possibly carrying an optional marker.
///
/// In `author.?editor.name`, `author` is required while `editor` and `name` are optional.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    path: PropertyPath,
    optional_from: Option<usize>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Self {
        let mut optional_from = None;
        let segments = raw
            .split('.')
            .filter(|segment| !segment.is_empty())
            .enumerate()
            .map(|(idx, segment)| match segment.strip_prefix(OPTIONAL_MARKER) {
                Some(stripped) => {
                    optional_from.get_or_insert(idx);
                    stripped.to_owned()
                }
                None => segment.to_owned(),
            })
            .collect();
        Self {
            path: PropertyPath::from_segments(segments),
            optional_from,
        }
    }

    pub fn required(path: PropertyPath) -> Self {
        Self {
            path,
            optional_from: None,
        }
    }

    /// The path without optional markers.
    pub fn path(&self) -> &PropertyPath {
        &self.path
    }

    /// The index of the first optional segment.
    pub fn optional_from(&self) -> Option<usize> {
        self.optional_from
    }

    pub fn is_optional(&self) -> bool {
        self.optional_from.is_some()
    }

    /// The key shared by all optional paths that belong to the same `OPTIONAL` block.
    ///
    /// This is the path up to and including the first marked segment, with its marker.
    pub fn optional_group(&self) -> Option<String> {
        let from = self.optional_from?;
        let mut segments = self.path.segments()[..from].to_vec();
        segments.push(format!(
            "{OPTIONAL_MARKER}{}",
            self.path.segments().get(from)?
        ));
        Some(segments.join("."))
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (idx, segment) in self.path.segments().iter().enumerate() {
            if idx > 0 {
                f.write_str(".")?;
            }
            if self.optional_from == Some(idx) {
                write!(f, "{OPTIONAL_MARKER}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// What a field projects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldSelector {
    /// `"path"`: a single value.
    Scalar(FieldPath),
    /// `["path"]`: every value of a (multi-valued) path.
    Array(FieldPath),
    /// `{"$property": "path", "$fields": {...}}`: an array of embedded objects. Member paths are
    /// relative to `property`.
    Objects {
        property: FieldPath,
        fields: BTreeMap<String, PropertyPath>,
    },
}

/// The reducing function of an aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Aggregator {
    Count,
    Avg,
    Sum,
    Min,
    Max,
    /// Collects all values of a path into an array.
    Array,
    /// Collects the members of a related entity into a single embedded object.
    Object,
}

impl Aggregator {
    pub fn from_name(name: &str) -> OdmResult<Self> {
        match name {
            "count" => Ok(Self::Count),
            "avg" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "array" => Ok(Self::Array),
            "object" => Ok(Self::Object),
            _ => Err(OdmError::UnknownAggregator(name.to_owned())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Returns true if the result is packed into a single string column.
    pub fn is_packed(self) -> bool {
        matches!(self, Self::Array | Self::Object)
    }
}

/// An aggregated output column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Aggregation {
    pub aggregator: Aggregator,
    /// The aggregated path. `None` for a `count` of root documents.
    pub property: Option<PropertyPath>,
    /// Members of the collected objects for `array` and `object`.
    pub fields: BTreeMap<String, PropertyPath>,
    pub distinct: bool,
}

impl Aggregation {
    pub fn new(aggregator: Aggregator, property: Option<&str>) -> Self {
        Self {
            aggregator,
            property: property.map(PropertyPath::parse),
            fields: BTreeMap::new(),
            distinct: false,
        }
    }

    /// Counts the root documents of each group.
    pub fn count() -> Self {
        Self::new(Aggregator::Count, None)
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, path: &str) -> Self {
        self.fields.insert(name.into(), PropertyPath::parse(path));
        self
    }

    #[must_use]
    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One entry of the `sort` list: a field or aggregate name and a direction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SortDirective {
    pub target: String,
    pub direction: SortDirection,
}

impl SortDirective {
    /// Parses `name` (ascending) or `-name` (descending).
    pub fn parse(directive: &str) -> Self {
        match directive.strip_prefix('-') {
            Some(target) => Self {
                target: target.to_owned(),
                direction: SortDirection::Descending,
            },
            None => Self {
                target: directive.to_owned(),
                direction: SortDirection::Ascending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdf_odm_schema::{ModelBuilder, PropertyDefinition, ScalarKind, Schema, UriPrefixes};

    #[test]
    fn optional_marker_applies_to_the_rest_of_the_path() {
        let path = FieldPath::parse("author.?editor.name");
        assert_eq!(path.path(), &PropertyPath::parse("author.editor.name"));
        assert_eq!(path.optional_from(), Some(1));
        assert_eq!(path.optional_group().as_deref(), Some("author.?editor"));
        assert_eq!(path.to_string(), "author.?editor.name");

        let path = FieldPath::parse("title");
        assert!(!path.is_optional());
        assert_eq!(path.optional_group(), None);
    }

    #[test]
    fn sort_directives() {
        assert_eq!(
            SortDirective::parse("-total"),
            SortDirective {
                target: "total".to_owned(),
                direction: SortDirection::Descending
            }
        );
        let spec = QuerySpec::new().field("title", "title").sort("title");
        assert_eq!(spec.sort_direction("title"), Some(SortDirection::Ascending));
        assert_eq!(spec.sort_direction("other"), None);
    }

    #[test]
    fn output_names_are_validated() {
        QuerySpec::new()
            .field("author.name", "author.name")
            .field("_id", "_id")
            .validate_names()
            .unwrap();
        for name in ["_root", "a b", "x\u{b7}y", "1st"] {
            assert!(
                matches!(
                    QuerySpec::new().field(name, "title").validate_names(),
                    Err(OdmError::InvalidQuery(_))
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn array_properties_are_projected_as_arrays() -> OdmResult<()> {
        let schema = Schema::builder(UriPrefixes::from_base("http://example.org/"))
            .model(ModelBuilder::new("User").scalar("name", ScalarKind::String))
            .model(
                ModelBuilder::new("BlogPost")
                    .scalar("title", ScalarKind::String)
                    .property(PropertyDefinition::scalar("tags", ScalarKind::String).array())
                    .property(PropertyDefinition::relation("readers", "User").array()),
            )
            .build()?;

        let spec = QuerySpec::new()
            .field("title", "title")
            .field("tags", "?tags")
            .field("readerNames", "readers.name")
            .normalized(&schema, "BlogPost")?;
        assert_eq!(
            spec.fields["title"],
            FieldSelector::Scalar(FieldPath::parse("title"))
        );
        assert_eq!(
            spec.fields["tags"],
            FieldSelector::Array(FieldPath::parse("?tags"))
        );
        assert_eq!(
            spec.fields["readerNames"],
            FieldSelector::Array(FieldPath::parse("readers.name"))
        );

        let spec = QuerySpec::new().normalized(&schema, "BlogPost")?;
        assert_eq!(spec.fields["_id"], FieldSelector::Scalar(FieldPath::parse("_id")));
        Ok(())
    }

    #[test]
    fn unknown_aggregator() {
        assert!(matches!(
            Aggregator::from_name("median"),
            Err(OdmError::UnknownAggregator(name)) if name == "median"
        ));
    }
}
