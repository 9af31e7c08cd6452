use rdf_odm_model::{NamedNode, OdmResult};
use rdf_odm_schema::{ModelBuilder, PropertyDefinition, Schema, SchemaBuilder, UriPrefixes};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// The serialized form of a schema and the graph it lives in.
///
/// ```json
/// {
///   "graph": "http://example.org/graph",
///   "class_prefix": "http://example.org/classes/",
///   "instance_prefix": "http://example.org/instances/",
///   "property_prefix": "http://example.org/properties/",
///   "models": {
///     "BlogPost": {
///       "properties": {
///         "title": { "type": "string" },
///         "author": { "type": "User" },
///         "tags": { "type": "string", "array": true }
///       }
///     }
///   }
/// }
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OdmConfig {
    /// Scopes every query and update to this named graph.
    #[serde(default)]
    pub graph: Option<String>,
    pub class_prefix: String,
    pub instance_prefix: String,
    pub property_prefix: String,
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Overrides `class_prefix + ModelName`.
    #[serde(default)]
    pub class_uri: Option<String>,
    /// Overrides `instance_prefix + lowercase(ModelName) + "/"`.
    #[serde(default)]
    pub instance_prefix: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PropertyConfig {
    /// A scalar kind (`string`, `number`, `boolean`, `date`) or a model name.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub array: bool,
    /// The property of the related model that this inverse relation mirrors.
    #[serde(default)]
    pub inverse: Option<String>,
    /// Overrides `property_prefix + ModelName + "/" + propertyName`.
    #[serde(default)]
    pub predicate: Option<String>,
}

impl OdmConfig {
    pub fn from_json_str(text: &str) -> OdmResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> OdmResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// The configured named graph, if any.
    pub fn graph(&self) -> OdmResult<Option<NamedNode>> {
        Ok(self.graph.clone().map(NamedNode::new).transpose()?)
    }

    /// Validates the models into an immutable [Schema].
    pub fn into_schema(self) -> OdmResult<Schema> {
        let prefixes = UriPrefixes {
            class: self.class_prefix,
            instance: self.instance_prefix,
            property: self.property_prefix,
        };
        self.models
            .into_iter()
            .fold(SchemaBuilder::new(prefixes), |builder, (name, model)| {
                builder.model(model.into_builder(name))
            })
            .build()
    }
}

impl ModelConfig {
    fn into_builder(self, name: String) -> ModelBuilder {
        let mut builder = ModelBuilder::new(name);
        if let Some(class_uri) = self.class_uri {
            builder = builder.class_uri(class_uri);
        }
        if let Some(prefix) = self.instance_prefix {
            builder = builder.instance_prefix(prefix);
        }
        self.properties
            .into_iter()
            .fold(builder, |builder, (name, property)| {
                let mut definition = PropertyDefinition::from_type_name(name, &property.type_name)
                    .with_array(property.array)
                    .with_inverse_of(property.inverse);
                if let Some(predicate) = property.predicate {
                    definition = definition.with_predicate(predicate);
                }
                builder.property(definition)
            })
    }
}
