//! Reads a [QuerySpec] from its JSON shape.
//!
//! ```json
//! {
//!   "field": { "title": "title", "tags": ["tags"], "writer": "author.?name" },
//!   "filter": { "title": { "$regex": "^post" }, "$or": [{ "views": { "$gt": 10 } }] },
//!   "aggregate": { "total": { "$count": true } },
//!   "sort": ["-total"],
//!   "limit": 10,
//!   "offset": 0,
//!   "distinct": false
//! }
//! ```

use crate::condition::{Condition, Operator};
use crate::spec::{Aggregation, Aggregator, FieldPath, FieldSelector, QuerySpec, SortDirective};
use rdf_odm_model::{OdmError, OdmResult};
use rdf_odm_schema::PropertyPath;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const PROPERTY_KEY: &str = "$property";
const FIELDS_KEY: &str = "$fields";
const AGGREGATOR_KEY: &str = "$aggregator";
const DISTINCT_KEY: &str = "distinct";

impl QuerySpec {
    /// Parses the JSON text of a query.
    pub fn from_json_str(text: &str) -> OdmResult<Self> {
        Self::from_json(&serde_json::from_str(text)?)
    }

    /// Reads a query from its JSON shape.
    ///
    /// Fails with [OdmError::InvalidSortInput] if `sort` is not a list of names and with
    /// [OdmError::InvalidQuery] for any other malformed part.
    pub fn from_json(query: &Value) -> OdmResult<Self> {
        let Value::Object(query) = query else {
            return OdmError::invalid_query("a query must be an object");
        };

        let mut spec = QuerySpec::new();
        for (key, value) in query {
            match key.as_str() {
                "field" | "fields" => spec.fields = parse_fields(value)?,
                "aggregate" | "aggregates" => spec.aggregates = parse_aggregates(value)?,
                "filter" => spec.filter = parse_filter(value)?,
                "sort" => spec.sort = parse_sort(value)?,
                "limit" => spec.limit = parse_count(key, value)?,
                "offset" => spec.offset = parse_count(key, value)?,
                "distinct" => spec.distinct = value.as_bool().unwrap_or_default(),
                _ => return OdmError::invalid_query(format!("unknown query key '{key}'")),
            }
        }
        spec.validate_names()?;
        Ok(spec)
    }
}

fn parse_fields(value: &Value) -> OdmResult<BTreeMap<String, FieldSelector>> {
    expect_object("field", value)?
        .iter()
        .map(|(name, selector)| Ok((name.clone(), parse_selector(name, selector)?)))
        .collect()
}

fn parse_selector(name: &str, selector: &Value) -> OdmResult<FieldSelector> {
    match selector {
        Value::String(path) => Ok(FieldSelector::Scalar(FieldPath::parse(path))),
        Value::Array(paths) => match paths.as_slice() {
            [Value::String(path)] => Ok(FieldSelector::Array(FieldPath::parse(path))),
            _ => OdmError::invalid_query(format!(
                "the array field '{name}' must name exactly one path"
            )),
        },
        Value::Object(object) => {
            let property = object
                .get(PROPERTY_KEY)
                .and_then(Value::as_str)
                .map(FieldPath::parse);
            let Some(property) = property else {
                return OdmError::invalid_query(format!(
                    "the field '{name}' needs a '{PROPERTY_KEY}'"
                ));
            };
            match object.get(FIELDS_KEY) {
                None => Ok(FieldSelector::Array(property)),
                Some(fields) => Ok(FieldSelector::Objects {
                    property,
                    fields: parse_members(name, fields)?,
                }),
            }
        }
        _ => OdmError::invalid_query(format!("invalid selector for the field '{name}'")),
    }
}

fn parse_members(name: &str, fields: &Value) -> OdmResult<BTreeMap<String, PropertyPath>> {
    expect_object(name, fields)?
        .iter()
        .map(|(member, path)| match path.as_str() {
            Some(path) => Ok((member.clone(), PropertyPath::parse(path))),
            None => OdmError::invalid_query(format!(
                "the member '{member}' of '{name}' must be a path"
            )),
        })
        .collect()
}

fn parse_aggregates(value: &Value) -> OdmResult<BTreeMap<String, Aggregation>> {
    expect_object("aggregate", value)?
        .iter()
        .map(|(name, aggregation)| Ok((name.clone(), parse_aggregation(name, aggregation)?)))
        .collect()
}

/// Parses `{"$aggregator": "sum", "$property": "views"}` or its shorthand `{"$sum": "views"}`.
fn parse_aggregation(name: &str, value: &Value) -> OdmResult<Aggregation> {
    let object = expect_object(name, value)?;
    let distinct = object
        .get(DISTINCT_KEY)
        .and_then(Value::as_bool)
        .unwrap_or_default();

    let (aggregator, property) = if let Some(aggregator) = object.get(AGGREGATOR_KEY) {
        let aggregator = aggregator.as_str().ok_or_else(|| {
            OdmError::InvalidQuery(format!("the aggregator of '{name}' must be a string"))
        })?;
        (
            Aggregator::from_name(aggregator)?,
            object.get(PROPERTY_KEY).and_then(Value::as_str),
        )
    } else {
        let shorthand = object
            .iter()
            .find(|(key, _)| {
                key.starts_with('$') && key.as_str() != FIELDS_KEY && key.as_str() != PROPERTY_KEY
            });
        let Some((key, target)) = shorthand else {
            return OdmError::invalid_query(format!("the aggregate '{name}' has no aggregator"));
        };
        (Aggregator::from_name(&key[1..])?, target.as_str())
    };

    let fields = match object.get(FIELDS_KEY) {
        Some(fields) => parse_members(name, fields)?,
        None => BTreeMap::new(),
    };
    if aggregator != Aggregator::Count && property.is_none() {
        return OdmError::invalid_query(format!(
            "the aggregate '{name}' needs a '{PROPERTY_KEY}'"
        ));
    }
    if aggregator == Aggregator::Object && fields.is_empty() {
        return OdmError::invalid_query(format!("the aggregate '{name}' needs '{FIELDS_KEY}'"));
    }

    Ok(Aggregation {
        aggregator,
        property: property.map(PropertyPath::parse),
        fields,
        distinct,
    })
}

fn parse_sort(value: &Value) -> OdmResult<Vec<SortDirective>> {
    let Value::Array(directives) = value else {
        return Err(OdmError::InvalidSortInput(value.to_string()));
    };
    directives
        .iter()
        .map(|directive| match directive {
            Value::String(directive) => Ok(SortDirective::parse(directive)),
            _ => Err(OdmError::InvalidSortInput(value.to_string())),
        })
        .collect()
}

fn parse_count(key: &str, value: &Value) -> OdmResult<Option<usize>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => match number.as_u64().map(usize::try_from) {
            Some(Ok(count)) => Ok(Some(count)),
            _ => OdmError::invalid_query(format!("'{key}' must be a non-negative integer")),
        },
        _ => OdmError::invalid_query(format!("'{key}' must be a non-negative integer")),
    }
}

/// Parses a filter object. Its entries must all hold.
fn parse_filter(value: &Value) -> OdmResult<Option<Condition>> {
    let mut conditions = parse_filter_entries(expect_object("filter", value)?)?;
    Ok(match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(Condition::And(conditions)),
    })
}

fn parse_filter_entries(filter: &Map<String, Value>) -> OdmResult<Vec<Condition>> {
    let mut conditions = Vec::with_capacity(filter.len());
    for (key, value) in filter {
        match key.as_str() {
            "$and" => conditions.push(Condition::And(parse_filter_list(key, value)?)),
            "$or" => conditions.push(Condition::Or(parse_filter_list(key, value)?)),
            "$not" => {
                let child = parse_filter(value)?.unwrap_or_else(|| Condition::And(Vec::new()));
                conditions.push(Condition::Not(Box::new(child)));
            }
            path => conditions.extend(parse_comparisons(path, value)?),
        }
    }
    Ok(conditions)
}

fn parse_filter_list(key: &str, value: &Value) -> OdmResult<Vec<Condition>> {
    let Value::Array(children) = value else {
        return OdmError::invalid_query(format!("'{key}' expects a list of filters"));
    };
    children
        .iter()
        .filter_map(|child| parse_filter(child).transpose())
        .collect()
}

/// Parses the constraints on a single path.
///
/// A scalar (or an object without operator keys, such as a `{_id, _type}` reference) means
/// `$eq`, and a list means `$in`.
fn parse_comparisons(path: &str, value: &Value) -> OdmResult<Vec<Condition>> {
    match value {
        Value::Object(operators) if operators.keys().any(|key| key.starts_with('$')) => operators
            .iter()
            .map(|(key, operand)| {
                Ok(Condition::compare(
                    path,
                    Operator::from_key(key)?,
                    operand.clone(),
                ))
            })
            .collect(),
        Value::Array(_) => Ok(vec![Condition::compare(path, Operator::In, value.clone())]),
        _ => Ok(vec![Condition::equals(path, value.clone())]),
    }
}

fn expect_object<'a>(name: &str, value: &'a Value) -> OdmResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| OdmError::InvalidQuery(format!("'{name}' must be an object")))
}
