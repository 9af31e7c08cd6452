use crate::datetime::normalize_datetime;
use rdf_odm_model::vocab::{rdf, xsd};
use rdf_odm_model::{Literal, NamedNode, OdmError, OdmResult, Term, ID_FIELD, TYPE_FIELD};
use rdf_odm_schema::{PropertyPath, PropertyResolver, ScalarKind, StepTarget};
use serde_json::{Number, Value};

/// Converts between document values and RDF terms.
///
/// The codec is a pure function of the schema it borrows. URIs are built from the per-model
/// prefixes of the schema. Identifiers are percent-encoded inside instance URIs, so any string is
/// a valid identifier.
#[derive(Clone, Copy)]
pub struct ValueCodec<'schema> {
    resolver: &'schema dyn PropertyResolver,
}

impl<'schema> ValueCodec<'schema> {
    pub fn new(resolver: &'schema dyn PropertyResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &'schema dyn PropertyResolver {
        self.resolver
    }

    /// The class URI of `model`.
    pub fn class_uri(&self, model: &str) -> OdmResult<NamedNode> {
        Ok(self.resolver.model(model)?.class_uri().clone())
    }

    /// The URI of the instance of `model` identified by `id`.
    pub fn instance_uri(&self, model: &str, id: &str) -> OdmResult<NamedNode> {
        let prefix = self.resolver.model(model)?.instance_prefix();
        Ok(NamedNode::new(format!(
            "{prefix}{}",
            urlencoding::encode(id)
        ))?)
    }

    /// Inverts [Self::instance_uri].
    ///
    /// Separators (`/`, `#`) between the prefix and the identifier are stripped. Fails with
    /// [OdmError::MalformedUri] if `uri` does not start with the instance prefix of `model`.
    pub fn id_from_instance_uri(&self, model: &str, uri: &str) -> OdmResult<String> {
        let malformed = || OdmError::MalformedUri {
            model: model.to_owned(),
            uri: uri.to_owned(),
        };

        let prefix = self.resolver.model(model)?.instance_prefix();
        let id = uri
            .strip_prefix(prefix)
            .ok_or_else(malformed)?
            .trim_matches(['/', '#']);
        if id.is_empty() {
            return Err(malformed());
        }
        urlencoding::decode(id)
            .map(|id| id.into_owned())
            .map_err(|_| malformed())
    }

    /// The name of the model whose class URI is `uri`.
    pub fn model_from_class_uri(&self, uri: &str) -> OdmResult<&'schema str> {
        Ok(self.resolver.model_for_class(uri)?.name())
    }

    /// Encodes `value` as the object of the triple that stores `path` on an instance of `model`.
    ///
    /// - `_type` yields the class URI of the named model.
    /// - `_id` and relations yield instance URIs. A relation value is either an identifier of the
    ///   declared related model or a `{_id, _type}` object.
    /// - Scalars yield typed literals, see [Self::encode_scalar].
    pub fn encode_value(&self, model: &str, path: &PropertyPath, value: &Value) -> OdmResult<Term> {
        let resolved = self.resolver.resolve_path(model, path)?;
        let Some(terminal) = resolved.terminal() else {
            return Ok(self.encode_reference(model, &path.to_string(), value)?.into());
        };

        let term: Term = match terminal.target {
            StepTarget::Type => {
                let model = value
                    .as_str()
                    .ok_or_else(|| invalid(path, "a model name must be a string"))?;
                self.class_uri(model)?.into()
            }
            StepTarget::Identity => self
                .encode_reference(terminal.owner.name(), &path.to_string(), value)?
                .into(),
            StepTarget::Property(property) => match property.related_model() {
                Some(related) => self
                    .encode_reference(related, &path.to_string(), value)?
                    .into(),
                None => {
                    let kind = property.scalar_kind().unwrap_or(ScalarKind::String);
                    encode_scalar(kind, &path.to_string(), value)?.into()
                }
            },
        };
        Ok(term)
    }

    /// Encodes a reference to an instance.
    ///
    /// `value` is either an identifier of `model` or an object carrying `_id` and, optionally, a
    /// `_type` naming a different model.
    pub fn encode_reference(&self, model: &str, path: &str, value: &Value) -> OdmResult<NamedNode> {
        match value {
            Value::String(id) => self.instance_uri(model, id),
            Value::Object(object) => {
                let id = object
                    .get(ID_FIELD)
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid(path, "a referenced document needs an _id"))?;
                let model = object
                    .get(TYPE_FIELD)
                    .and_then(Value::as_str)
                    .unwrap_or(model);
                self.instance_uri(model, id)
            }
            _ => Err(invalid(path, "a reference must be an id or an {_id, _type} object")),
        }
    }

    /// Decodes a term without knowing the property it belongs to.
    ///
    /// Class URIs of registered models decode to the model name. Other URIs are returned as is.
    pub fn decode_term(&self, term: &Term) -> Value {
        match term {
            Term::Literal(literal) => decode_literal(literal),
            Term::NamedNode(node) => Value::String(
                self.model_from_class_uri(node.as_str())
                    .map_or_else(|_| node.as_str().to_owned(), ToOwned::to_owned),
            ),
            Term::BlankNode(node) => Value::String(node.as_str().to_owned()),
        }
    }
}

/// Encodes a scalar as a literal of `kind`.
///
/// Integers become `xsd:integer`, other numbers `xsd:double`. Dates are normalized to an
/// `xsd:dateTime` with millisecond precision in UTC.
pub fn encode_scalar(kind: ScalarKind, path: &str, value: &Value) -> OdmResult<Literal> {
    match (kind, value) {
        (ScalarKind::String, Value::String(text)) => Ok(Literal::new_simple_literal(text)),
        (ScalarKind::String, Value::Number(number)) => {
            Ok(Literal::new_simple_literal(number.to_string()))
        }
        (ScalarKind::String, Value::Bool(flag)) => {
            Ok(Literal::new_simple_literal(flag.to_string()))
        }
        (ScalarKind::Number, Value::Number(number)) => number_literal(number)
            .ok_or_else(|| invalid(path, "the number cannot be represented")),
        (ScalarKind::Number, Value::String(text)) => text
            .trim()
            .parse::<Number>()
            .ok()
            .as_ref()
            .and_then(number_literal)
            .ok_or_else(|| invalid(path, "expected a number")),
        (ScalarKind::Boolean, Value::Bool(flag)) => Ok(Literal::from(*flag)),
        (ScalarKind::Boolean, Value::String(text)) => match text.as_str() {
            "true" | "1" => Ok(Literal::from(true)),
            "false" | "0" => Ok(Literal::from(false)),
            _ => Err(invalid(path, "expected a boolean")),
        },
        (ScalarKind::Date, _) => normalize_datetime(value)
            .map(|datetime| Literal::new_typed_literal(datetime, xsd::DATE_TIME))
            .ok_or_else(|| invalid(path, "expected a date")),
        (kind, _) => Err(invalid(path, &format!("expected a {kind}"))),
    }
}

/// Decodes a literal according to its datatype.
///
/// Numeric datatypes become JSON numbers, `xsd:boolean` a JSON boolean and dates their
/// canonical timestamp string. Unknown datatypes fall back to the lexical form.
pub fn decode_literal(literal: &Literal) -> Value {
    let datatype = literal.datatype();
    let value = literal.value();
    if datatype == xsd::STRING || datatype == rdf::LANG_STRING {
        Value::String(value.to_owned())
    } else if datatype == xsd::BOOLEAN {
        match value {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(value.to_owned()),
        }
    } else if is_numeric(datatype.as_str()) {
        parse_number(value).unwrap_or_else(|| Value::String(value.to_owned()))
    } else if datatype == xsd::DATE_TIME || datatype == xsd::DATE {
        let text = Value::String(value.to_owned());
        normalize_datetime(&text).map_or(text, Value::String)
    } else {
        tracing::warn!(
            "Unknown literal datatype {datatype}, decoding {value:?} as a string"
        );
        Value::String(value.to_owned())
    }
}

/// Decodes the lexical form of a scalar that was packed into an array.
pub fn decode_lexical(kind: ScalarKind, text: &str) -> Value {
    let fallback = || Value::String(text.to_owned());
    match kind {
        ScalarKind::String => fallback(),
        ScalarKind::Number => parse_number(text).unwrap_or_else(fallback),
        ScalarKind::Boolean => match text {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => fallback(),
        },
        ScalarKind::Date => normalize_datetime(&fallback()).map_or_else(fallback, Value::String),
    }
}

fn invalid(path: impl ToString, reason: &str) -> OdmError {
    OdmError::InvalidValue {
        path: path.to_string(),
        reason: reason.to_owned(),
    }
}

fn number_literal(number: &Number) -> Option<Literal> {
    if let Some(integer) = number.as_i64() {
        return Some(Literal::from(integer));
    }
    number.as_f64().filter(|f| f.is_finite()).map(Literal::from)
}

fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(integer) = text.parse::<i64>() {
        return Some(Value::Number(integer.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn is_numeric(datatype: &str) -> bool {
    const NUMERIC: [&str; 16] = [
        "integer",
        "decimal",
        "double",
        "float",
        "long",
        "int",
        "short",
        "byte",
        "nonNegativeInteger",
        "nonPositiveInteger",
        "negativeInteger",
        "positiveInteger",
        "unsignedLong",
        "unsignedInt",
        "unsignedShort",
        "unsignedByte",
    ];
    datatype
        .strip_prefix("http://www.w3.org/2001/XMLSchema#")
        .is_some_and(|local| NUMERIC.contains(&local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdf_odm_schema::{ModelBuilder, PropertyDefinition, Schema, UriPrefixes};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder(UriPrefixes::from_base("http://example.org/"))
            .model(
                ModelBuilder::new("User")
                    .scalar("name", ScalarKind::String)
                    .scalar("age", ScalarKind::Number)
                    .scalar("active", ScalarKind::Boolean)
                    .scalar("born", ScalarKind::Date),
            )
            .model(
                ModelBuilder::new("BlogPost")
                    .instance_prefix("http://example.org/posts#")
                    .relation("author", "User")
                    .property(PropertyDefinition::relation("readers", "User").array()),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn instance_uris_round_trip() -> OdmResult<()> {
        let schema = schema();
        let codec = ValueCodec::new(&schema);
        for (model, id) in [("User", "user1"), ("BlogPost", "post 1"), ("User", "a/b")] {
            let uri = codec.instance_uri(model, id)?;
            assert_eq!(codec.id_from_instance_uri(model, uri.as_str())?, id);
        }
        assert_eq!(
            codec.instance_uri("BlogPost", "post1")?.as_str(),
            "http://example.org/posts#post1"
        );
        Ok(())
    }

    #[test]
    fn foreign_uris_are_malformed() -> OdmResult<()> {
        let schema = schema();
        let codec = ValueCodec::new(&schema);
        let user = codec.instance_uri("User", "user1")?;
        assert!(matches!(
            codec.id_from_instance_uri("BlogPost", user.as_str()),
            Err(OdmError::MalformedUri { .. })
        ));
        assert!(matches!(
            codec.id_from_instance_uri("User", "http://example.org/instances/user/"),
            Err(OdmError::MalformedUri { .. })
        ));
        Ok(())
    }

    #[test]
    fn encode_identity_type_and_relations() -> OdmResult<()> {
        let schema = schema();
        let codec = ValueCodec::new(&schema);
        let user1: Term = codec.instance_uri("User", "user1")?.into();

        assert_eq!(
            codec.encode_value("BlogPost", &"_type".into(), &json!("User"))?,
            codec.class_uri("User")?.into()
        );
        assert_eq!(
            codec.encode_value("User", &"_id".into(), &json!("user1"))?,
            user1
        );
        assert_eq!(
            codec.encode_value("BlogPost", &"author".into(), &json!("user1"))?,
            user1
        );
        assert_eq!(
            codec.encode_value(
                "BlogPost",
                &"readers".into(),
                &json!({"_id": "user1", "_type": "User"})
            )?,
            user1
        );
        assert_eq!(
            codec.encode_value("BlogPost", &"author._id".into(), &json!("user1"))?,
            user1
        );
        Ok(())
    }

    #[test]
    fn encode_errors() {
        let schema = schema();
        let codec = ValueCodec::new(&schema);
        assert!(matches!(
            codec.encode_value("User", &"missing".into(), &json!(1)),
            Err(OdmError::UnknownProperty { .. })
        ));
        assert!(matches!(
            codec.encode_value("User", &"_type".into(), &json!("Nope")),
            Err(OdmError::UnknownModel(_))
        ));
        assert!(matches!(
            codec.encode_value("User", &"age".into(), &json!("old")),
            Err(OdmError::InvalidValue { .. })
        ));
    }

    #[test]
    fn scalars_round_trip() -> OdmResult<()> {
        let schema = schema();
        let codec = ValueCodec::new(&schema);
        let cases = [
            ("name", json!("tag\"7")),
            ("age", json!(42)),
            ("age", json!(-1.5)),
            ("active", json!(true)),
            ("born", json!("2024-03-01T10:20:30.250Z")),
        ];
        for (property, value) in cases {
            let Term::Literal(literal) = codec.encode_value("User", &property.into(), &value)?
            else {
                panic!("{property} must encode to a literal");
            };
            assert_eq!(decode_literal(&literal), value, "{property}");
        }
        Ok(())
    }

    #[test]
    fn dates_are_normalized() -> OdmResult<()> {
        let literal = encode_scalar(ScalarKind::Date, "born", &json!("2024-03-01"))?;
        assert_eq!(literal.value(), "2024-03-01T00:00:00.000Z");
        assert_eq!(literal.datatype(), xsd::DATE_TIME);
        Ok(())
    }

    #[test]
    fn decode_lexical_forms() {
        assert_eq!(decode_lexical(ScalarKind::Number, "7"), json!(7));
        assert_eq!(decode_lexical(ScalarKind::Boolean, "false"), json!(false));
        assert_eq!(decode_lexical(ScalarKind::String, "7"), json!("7"));
        assert_eq!(
            decode_lexical(ScalarKind::Date, "2024-03-01T10:20:30Z"),
            json!("2024-03-01T10:20:30.000Z")
        );
    }

    #[test]
    fn unknown_datatype_falls_back_to_string() -> OdmResult<()> {
        let literal =
            Literal::new_typed_literal("POINT(1 2)", NamedNode::new("http://example.org/wkt")?);
        assert_eq!(decode_literal(&literal), json!("POINT(1 2)"));
        Ok(())
    }

    #[test]
    fn decode_class_uris_to_model_names() -> OdmResult<()> {
        let schema = schema();
        let codec = ValueCodec::new(&schema);
        let class: Term = codec.class_uri("BlogPost")?.into();
        assert_eq!(codec.decode_term(&class), json!("BlogPost"));
        Ok(())
    }
}
