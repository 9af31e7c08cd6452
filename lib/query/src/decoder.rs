//! Turns result rows back into nested documents.
//!
//! The decoder is built from the same [QuerySpec] as the query. It knows the kind of every output
//! column, so it can decode instance URIs to ids, class URIs to model names and packed arrays to
//! JSON arrays. Columns it does not know are decoded by their term alone.

use crate::spec::{Aggregator, FieldSelector, QuerySpec, SortDirection};
use rdf_odm_encoding::packing::{unpack_objects, unpack_values};
use rdf_odm_encoding::variables::{output_segments, output_variable};
use rdf_odm_encoding::{decode_lexical, ValueCodec};
use rdf_odm_model::{insert_nested, Document, OdmResult, Term, Variable};
use rdf_odm_schema::{PropertyPath, PropertyResolver, ScalarKind, StepTarget};
use serde_json::{Map, Value};
use sparesults::QuerySolution;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// How a single value of a column is decoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Element<'schema> {
    Scalar(ScalarKind),
    /// An instance URI of the given model, decoded to its id.
    Reference(&'schema str),
    /// A class URI, decoded to a model name.
    Type,
    /// Decoded by the term alone.
    Raw,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ColumnKind<'schema> {
    Value(Element<'schema>),
    Values(Element<'schema>),
    Objects {
        members: BTreeMap<String, Element<'schema>>,
        /// Only the first object is kept.
        single: bool,
    },
}

#[derive(Clone, Debug)]
struct Column<'schema> {
    field: String,
    kind: ColumnKind<'schema>,
    direction: SortDirection,
}

/// Decodes the rows of a query compiled from a [QuerySpec].
pub struct ResultDecoder<'schema> {
    codec: ValueCodec<'schema>,
    columns: HashMap<String, Column<'schema>>,
}

impl<'schema> ResultDecoder<'schema> {
    /// Plans the decoding of the query that `spec` compiles to.
    pub fn new(
        resolver: &'schema dyn PropertyResolver,
        model: &str,
        spec: &QuerySpec,
    ) -> OdmResult<Self> {
        let codec = ValueCodec::new(resolver);
        let element_of = |path: &PropertyPath| element(resolver, model, path);
        let spec = &spec.normalized(resolver, model)?;

        let mut columns = HashMap::new();
        for (name, selector) in &spec.fields {
            let kind = match selector {
                FieldSelector::Scalar(path) => ColumnKind::Value(element_of(path.path())?),
                FieldSelector::Array(path) => ColumnKind::Values(element_of(path.path())?),
                FieldSelector::Objects { property, fields } => ColumnKind::Objects {
                    members: members(resolver, model, property.path(), fields)?,
                    single: false,
                },
            };
            columns.insert(output_variable(name)?.into_string(), column(spec, name, kind));
        }
        for (name, aggregation) in &spec.aggregates {
            let kind = match (&aggregation.property, aggregation.aggregator) {
                (None, _) | (Some(_), Aggregator::Count | Aggregator::Sum | Aggregator::Avg) => {
                    ColumnKind::Value(Element::Raw)
                }
                (Some(path), Aggregator::Min | Aggregator::Max) => {
                    ColumnKind::Value(element_of(path)?)
                }
                (Some(path), Aggregator::Array) if aggregation.fields.is_empty() => {
                    ColumnKind::Values(element_of(path)?)
                }
                (Some(path), aggregator @ (Aggregator::Array | Aggregator::Object)) => {
                    ColumnKind::Objects {
                        members: members(resolver, model, path, &aggregation.fields)?,
                        single: aggregator == Aggregator::Object,
                    }
                }
            };
            columns.insert(output_variable(name)?.into_string(), column(spec, name, kind));
        }

        Ok(Self { codec, columns })
    }

    pub fn decode_solution(&self, solution: &QuerySolution) -> OdmResult<Document> {
        self.decode(solution.iter())
    }

    /// Decodes one row, given as its bound variables.
    ///
    /// Unbound columns, empty strings and empty arrays are left out of the document.
    pub fn decode<'a>(
        &self,
        bindings: impl IntoIterator<Item = (&'a Variable, &'a Term)>,
    ) -> OdmResult<Document> {
        let mut document = Document::new();
        for (variable, term) in bindings {
            let name = variable.as_str();
            let Some(column) = self.columns.get(name) else {
                if let Some(segments) = output_segments(name) {
                    insert_value(&mut document, &segments, self.codec.decode_term(term));
                }
                continue;
            };

            let segments = column.field.split('.').collect::<Vec<_>>();
            if let Some(value) = self.decode_column(column, term)? {
                insert_value(&mut document, &segments, value);
            }
        }
        Ok(document)
    }

    fn decode_column(&self, column: &Column<'schema>, term: &Term) -> OdmResult<Option<Value>> {
        match &column.kind {
            ColumnKind::Value(element) => Ok(self.decode_term(&column.field, *element, term)),
            ColumnKind::Values(element) => {
                let mut values = unpack_values(&column.field, &packed_text(term))?
                    .iter()
                    .map(|text| self.decode_text(&column.field, *element, text))
                    .collect::<Vec<_>>();
                sort_values(&mut values, column.direction);
                Ok(Some(Value::Array(values)))
            }
            ColumnKind::Objects { members, single } => {
                let mut objects = Vec::new();
                for object in unpack_objects(&column.field, &packed_text(term))? {
                    let object = self.decode_object(&column.field, members, object);
                    if !object.is_empty() {
                        objects.push(Value::Object(object));
                    }
                }
                sort_values(&mut objects, column.direction);
                if *single {
                    return Ok(objects.into_iter().next());
                }
                Ok(Some(Value::Array(objects)))
            }
        }
    }

    fn decode_object(
        &self,
        field: &str,
        members: &BTreeMap<String, Element<'schema>>,
        object: Map<String, Value>,
    ) -> Map<String, Value> {
        let mut decoded = Map::new();
        for (key, member) in object {
            let Value::String(text) = member else {
                continue;
            };
            let element = members.get(&key).copied().unwrap_or(Element::Raw);
            let value = self.decode_text(field, element, &text);
            if !is_blank(&value) {
                decoded.insert(key, value);
            }
        }
        decoded
    }

    fn decode_term(
        &self,
        field: &str,
        element: Element<'schema>,
        term: &Term,
    ) -> Option<Value> {
        let value = match (element, term) {
            (_, Term::Literal(literal)) if literal.value().is_empty() => return None,
            (Element::Reference(model), Term::NamedNode(node)) => {
                self.decode_reference(field, model, node.as_str())
            }
            (Element::Scalar(_) | Element::Reference(_) | Element::Type | Element::Raw, _) => {
                self.codec.decode_term(term)
            }
        };
        tracing::trace!("Decoded {field} = {value}");
        Some(value)
    }

    /// Decodes an instance URI of `model` to its id.
    ///
    /// A URI outside the instance namespace of `model` is kept as it is.
    fn decode_reference(&self, field: &str, model: &str, uri: &str) -> Value {
        match self.codec.id_from_instance_uri(model, uri) {
            Ok(id) => Value::String(id),
            Err(error) => {
                tracing::warn!("Keeping the reference in {field} as an IRI: {error}");
                Value::String(uri.to_owned())
            }
        }
    }

    /// Decodes the lexical form of one packed element.
    fn decode_text(&self, field: &str, element: Element<'schema>, text: &str) -> Value {
        match element {
            Element::Scalar(kind) => decode_lexical(kind, text),
            Element::Reference(model) => self.decode_reference(field, model, text),
            Element::Type => Value::String(
                self.codec
                    .model_from_class_uri(text)
                    .map_or_else(|_| text.to_owned(), ToOwned::to_owned),
            ),
            Element::Raw => {
                tracing::trace!("Decoding packed element of {field} as a string");
                Value::String(text.to_owned())
            }
        }
    }
}

fn column<'schema>(spec: &QuerySpec, name: &str, kind: ColumnKind<'schema>) -> Column<'schema> {
    Column {
        field: name.to_owned(),
        kind,
        direction: spec.sort_direction(name).unwrap_or_default(),
    }
}

/// The kind of the values that `path` reaches.
fn element<'schema>(
    resolver: &'schema dyn PropertyResolver,
    model: &str,
    path: &PropertyPath,
) -> OdmResult<Element<'schema>> {
    let resolved = resolver.resolve_path(model, path)?;
    let Some(terminal) = resolved.terminal() else {
        return Ok(Element::Reference(resolved.root().name()));
    };
    Ok(match terminal.target {
        StepTarget::Identity => {
            let owner = terminal.owner;
            Element::Reference(owner.name())
        }
        StepTarget::Type => Element::Type,
        StepTarget::Property(property) => match (property.scalar_kind(), property.related_model()) {
            (Some(kind), _) => Element::Scalar(kind),
            (None, Some(related)) => Element::Reference(related),
            (None, None) => Element::Raw,
        },
    })
}

fn members<'schema>(
    resolver: &'schema dyn PropertyResolver,
    model: &str,
    property: &PropertyPath,
    fields: &BTreeMap<String, PropertyPath>,
) -> OdmResult<BTreeMap<String, Element<'schema>>> {
    fields
        .iter()
        .map(|(key, path)| Ok((key.clone(), element(resolver, model, &property.join(path))?)))
        .collect()
}

fn packed_text(term: &Term) -> String {
    match term {
        Term::Literal(literal) => literal.value().to_owned(),
        Term::NamedNode(node) => node.as_str().to_owned(),
        Term::BlankNode(node) => node.as_str().to_owned(),
    }
}

fn insert_value(document: &mut Document, segments: &[&str], value: Value) {
    if !is_blank(&value) {
        insert_nested(document, segments, value);
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Array(values) => values.is_empty(),
        Value::Object(members) => members.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Sorts ascending, numbers numerically and everything else by its text.
fn sort_values(values: &mut [Value], direction: SortDirection) {
    values.sort_by(compare_values);
    if direction == SortDirection::Descending {
        values.reverse();
    }
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => {
            match (left.as_f64(), right.as_f64()) {
                (Some(left), Some(right)) => left.total_cmp(&right),
                _ => left.to_string().cmp(&right.to_string()),
            }
        }
        (Value::String(left), Value::String(right)) => left.cmp(right),
        (left, right) => left.to_string().cmp(&right.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Aggregation;
    use insta::assert_snapshot;
    use rdf_odm_encoding::packing::{object_member_prefix, ArrayPacking, OBJECT_SUFFIX};
    use rdf_odm_model::vocab::xsd;
    use rdf_odm_model::{Literal, NamedNode};
    use rdf_odm_schema::{ModelBuilder, PropertyDefinition, Schema, UriPrefixes};

    fn schema() -> Schema {
        Schema::builder(UriPrefixes::from_base("http://example.org/"))
            .model(
                ModelBuilder::new("User")
                    .scalar("name", ScalarKind::String)
                    .scalar("age", ScalarKind::Number),
            )
            .model(
                ModelBuilder::new("BlogPost")
                    .scalar("title", ScalarKind::String)
                    .scalar("published", ScalarKind::Date)
                    .relation("author", "User")
                    .property(PropertyDefinition::scalar("tags", ScalarKind::String).array())
                    .property(PropertyDefinition::relation("readers", "User").array()),
            )
            .build()
            .unwrap()
    }

    fn var(name: &str) -> Variable {
        output_variable(name).unwrap()
    }

    fn uri(value: &str) -> Term {
        NamedNode::new_unchecked(value).into()
    }

    fn text(value: &str) -> Term {
        Literal::new_simple_literal(value).into()
    }

    fn values(elements: &[&str]) -> Term {
        let packing = ArrayPacking::Values;
        text(&format!(
            "{}{}{}",
            packing.open(),
            elements.join(packing.separator()),
            packing.close()
        ))
    }

    fn pretty(document: &Document) -> String {
        serde_json::to_string_pretty(document).unwrap()
    }

    #[test]
    fn decodes_scalars_references_and_types() {
        let schema = schema();
        let spec = QuerySpec::new()
            .field("_id", "_id")
            .field("_type", "_type")
            .field("title", "title")
            .field("published", "published")
            .field("author.name", "author.name")
            .field("author._id", "author._id");
        let decoder = ResultDecoder::new(&schema, "BlogPost", &spec).unwrap();

        let row = [
            (var("_id"), uri("http://example.org/instances/blogpost/post1")),
            (var("_type"), uri("http://example.org/classes/BlogPost")),
            (var("title"), text("Hello")),
            (
                var("published"),
                Literal::new_typed_literal("2024-05-01T10:00:00+02:00", xsd::DATE_TIME).into(),
            ),
            (var("author.name"), text("Alice")),
            (var("author._id"), uri("http://example.org/instances/user/user%201")),
        ];
        let document = decoder
            .decode(row.iter().map(|(variable, term)| (variable, term)))
            .unwrap();

        assert_snapshot!(pretty(&document), @r#"
        {
          "_id": "post1",
          "_type": "BlogPost",
          "author": {
            "_id": "user 1",
            "name": "Alice"
          },
          "published": "2024-05-01T08:00:00.000Z",
          "title": "Hello"
        }
        "#);
    }

    #[test]
    fn drops_empty_values() {
        let schema = schema();
        let spec = QuerySpec::new()
            .field("title", "title")
            .field("authorName", "author.?name")
            .array_field("tags", "tags");
        let decoder = ResultDecoder::new(&schema, "BlogPost", &spec).unwrap();

        let row = [
            (var("title"), text("Hello")),
            (var("authorName"), text("")),
            (var("tags"), values(&[""])),
        ];
        let document = decoder
            .decode(row.iter().map(|(variable, term)| (variable, term)))
            .unwrap();

        assert_snapshot!(pretty(&document), @r#"
        {
          "title": "Hello"
        }
        "#);
    }

    #[test]
    fn unpacks_and_sorts_arrays() {
        let schema = schema();
        let spec = QuerySpec::new()
            .array_field("tags", "tags")
            .array_field("readers", "readers")
            .sort("-tags");
        let decoder = ResultDecoder::new(&schema, "BlogPost", &spec).unwrap();

        let row = [
            (var("tags"), values(&["b%2C%20c", "a", "z"])),
            (
                var("readers"),
                values(&[
                    "http%3A%2F%2Fexample.org%2Finstances%2Fuser%2Fuser2",
                    "http%3A%2F%2Fexample.org%2Finstances%2Fuser%2Fuser1",
                ]),
            ),
        ];
        let document = decoder
            .decode(row.iter().map(|(variable, term)| (variable, term)))
            .unwrap();

        assert_snapshot!(pretty(&document), @r#"
        {
          "readers": [
            "user1",
            "user2"
          ],
          "tags": [
            "z",
            "b, c",
            "a"
          ]
        }
        "#);
    }

    #[test]
    fn unpacks_objects() {
        let schema = schema();
        let spec = QuerySpec::new()
            .aggregate(
                "readers",
                Aggregation::new(Aggregator::Array, Some("readers"))
                    .with_field("name", "name")
                    .with_field("age", "age"),
            )
            .aggregate(
                "firstReader",
                Aggregation::new(Aggregator::Object, Some("readers")).with_field("name", "name"),
            )
            .aggregate("count", Aggregation::count());
        let decoder = ResultDecoder::new(&schema, "BlogPost", &spec).unwrap();

        let packed = |objects: &[&[(&str, &str)]]| {
            let packing = ArrayPacking::Objects;
            let objects = objects
                .iter()
                .map(|members| {
                    let mut object = members
                        .iter()
                        .enumerate()
                        .map(|(index, (key, value))| {
                            format!("{}{value}", object_member_prefix(index, key))
                        })
                        .collect::<String>();
                    object.push_str(OBJECT_SUFFIX);
                    object
                })
                .collect::<Vec<_>>();
            text(&format!(
                "{}{}{}",
                packing.open(),
                objects.join(packing.separator()),
                packing.close()
            ))
        };

        let row = [
            (
                var("readers"),
                packed(&[&[("age", "42"), ("name", "Bob")], &[("age", ""), ("name", "Alice")]]),
            ),
            (var("firstReader"), packed(&[&[("name", "Carol")], &[("name", "Bob")]])),
            (
                var("count"),
                Literal::new_typed_literal("2", xsd::INTEGER).into(),
            ),
        ];
        let document = decoder
            .decode(row.iter().map(|(variable, term)| (variable, term)))
            .unwrap();

        assert_snapshot!(pretty(&document), @r#"
        {
          "count": 2,
          "firstReader": {
            "name": "Bob"
          },
          "readers": [
            {
              "age": 42,
              "name": "Bob"
            },
            {
              "name": "Alice"
            }
          ]
        }
        "#);
    }

    #[test]
    fn foreign_instance_uris_are_kept() {
        let schema = schema();
        let spec = QuerySpec::new()
            .field("author", "author")
            .array_field("readers", "readers");
        let decoder = ResultDecoder::new(&schema, "BlogPost", &spec).unwrap();
        let row = [
            (var("author"), uri("http://other.org/alice")),
            (
                var("readers"),
                values(&[
                    "http%3A%2F%2Fexample.org%2Finstances%2Fblogpost%2Fpost1",
                    "http%3A%2F%2Fexample.org%2Finstances%2Fuser%2Fuser1",
                ]),
            ),
        ];
        let document = decoder
            .decode(row.iter().map(|(variable, term)| (variable, term)))
            .unwrap();

        assert_snapshot!(pretty(&document), @r#"
        {
          "author": "http://other.org/alice",
          "readers": [
            "http://example.org/instances/blogpost/post1",
            "user1"
          ]
        }
        "#);
    }

    #[test]
    fn unknown_columns_fall_back_to_the_term() {
        let schema = schema();
        let decoder = ResultDecoder::new(&schema, "BlogPost", &QuerySpec::new()).unwrap();
        let row = [
            (var("extra"), text("value")),
            (
                Variable::new_unchecked("_p\u{b7}author"),
                uri("http://example.org/instances/user/user1"),
            ),
        ];
        let document = decoder
            .decode(row.iter().map(|(variable, term)| (variable, term)))
            .unwrap();

        assert_snapshot!(pretty(&document), @r#"
        {
          "extra": "value"
        }
        "#);
    }
}
