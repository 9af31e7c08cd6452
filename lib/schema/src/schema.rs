use crate::builder::{SchemaBuilder, UriPrefixes};
use crate::descriptor::PropertyDescriptor;
use crate::resolver::PropertyResolver;
use rdf_odm_model::{NamedNode, OdmError, OdmResult};
use std::collections::{BTreeMap, HashMap};

/// A registered model: its class URI, the prefix of its instance URIs, and its properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelDefinition {
    name: String,
    class_uri: NamedNode,
    instance_prefix: String,
    properties: BTreeMap<String, PropertyDescriptor>,
}

impl ModelDefinition {
    pub(crate) fn new(
        name: String,
        class_uri: NamedNode,
        instance_prefix: String,
        properties: BTreeMap<String, PropertyDescriptor>,
    ) -> Self {
        Self {
            name,
            class_uri,
            instance_prefix,
            properties,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_uri(&self) -> &NamedNode {
        &self.class_uri
    }

    pub fn instance_prefix(&self) -> &str {
        &self.instance_prefix
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.values()
    }
}

/// An immutable snapshot of all registered models.
///
/// A schema is built once at startup and never mutated afterward. It can be shared freely between
/// threads.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    models: HashMap<String, ModelDefinition>,
    /// Class URI -> model name
    classes: HashMap<String, String>,
}

impl Schema {
    pub fn builder(prefixes: UriPrefixes) -> SchemaBuilder {
        SchemaBuilder::new(prefixes)
    }

    pub(crate) fn new(models: Vec<ModelDefinition>) -> Self {
        let classes = models
            .iter()
            .map(|m| (m.class_uri.as_str().to_owned(), m.name.clone()))
            .collect();
        let models = models.into_iter().map(|m| (m.name.clone(), m)).collect();
        Self { models, classes }
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.values()
    }
}

impl PropertyResolver for Schema {
    fn model(&self, name: &str) -> OdmResult<&ModelDefinition> {
        self.models
            .get(name)
            .ok_or_else(|| OdmError::UnknownModel(name.to_owned()))
    }

    fn model_for_class(&self, class_uri: &str) -> OdmResult<&ModelDefinition> {
        self.classes
            .get(class_uri)
            .and_then(|name| self.models.get(name))
            .ok_or_else(|| OdmError::UnknownModel(class_uri.to_owned()))
    }
}
