use crate::descriptor::{PropertyDescriptor, PropertyKind, ScalarKind};
use crate::schema::{ModelDefinition, Schema};
use rdf_odm_model::{NamedNode, OdmError, OdmResult};
use std::collections::{BTreeMap, HashMap, HashSet};

/// The prefixes from which default class, instance, and predicate URIs are minted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UriPrefixes {
    /// Class URIs are `class + ModelName`.
    pub class: String,
    /// Instance URIs are `instance + lowercase(ModelName) + "/" + id`.
    pub instance: String,
    /// Predicates are `property + ModelName + "/" + propertyName`.
    pub property: String,
}

impl UriPrefixes {
    /// Derives all prefixes from a common `base`.
    pub fn from_base(base: &str) -> Self {
        Self {
            class: format!("{base}classes/"),
            instance: format!("{base}instances/"),
            property: format!("{base}properties/"),
        }
    }
}

/// What a property definition points at before the schema is resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
enum PropertyTarget {
    Scalar(ScalarKind),
    Model(String),
}

/// The unresolved definition of a single property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDefinition {
    name: String,
    target: PropertyTarget,
    array: bool,
    inverse_of: Option<String>,
    predicate: Option<String>,
}

impl PropertyDefinition {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self::new(name.into(), PropertyTarget::Scalar(kind))
    }

    pub fn relation(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(name.into(), PropertyTarget::Model(model.into()))
    }

    /// An inverse relation: the instances of `model` whose `property` points at the owner.
    pub fn inverse(
        name: impl Into<String>,
        model: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        let mut definition = Self::relation(name, model);
        definition.inverse_of = Some(property.into());
        definition
    }

    /// Parses a type name, as used in configurations: a scalar kind or a model name.
    pub fn from_type_name(name: impl Into<String>, type_name: &str) -> Self {
        match ScalarKind::from_name(type_name) {
            Some(kind) => Self::scalar(name, kind),
            None => Self::relation(name, type_name),
        }
    }

    fn new(name: String, target: PropertyTarget) -> Self {
        Self {
            name,
            target,
            array: false,
            inverse_of: None,
            predicate: None,
        }
    }

    #[must_use]
    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    #[must_use]
    pub fn with_array(mut self, array: bool) -> Self {
        self.array = array;
        self
    }

    #[must_use]
    pub fn with_inverse_of(mut self, property: Option<String>) -> Self {
        self.inverse_of = property;
        self
    }

    /// Overrides the default predicate URI.
    #[must_use]
    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }
}

/// The unresolved definition of a model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelBuilder {
    name: String,
    class_uri: Option<String>,
    instance_prefix: Option<String>,
    properties: Vec<PropertyDefinition>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_uri: None,
            instance_prefix: None,
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn class_uri(mut self, class_uri: impl Into<String>) -> Self {
        self.class_uri = Some(class_uri.into());
        self
    }

    #[must_use]
    pub fn instance_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.instance_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    #[must_use]
    pub fn scalar(self, name: impl Into<String>, kind: ScalarKind) -> Self {
        self.property(PropertyDefinition::scalar(name, kind))
    }

    #[must_use]
    pub fn relation(self, name: impl Into<String>, model: impl Into<String>) -> Self {
        self.property(PropertyDefinition::relation(name, model))
    }
}

/// Collects model definitions and validates them into an immutable [Schema].
#[derive(Clone, Debug)]
pub struct SchemaBuilder {
    prefixes: UriPrefixes,
    models: Vec<ModelBuilder>,
}

impl SchemaBuilder {
    pub fn new(prefixes: UriPrefixes) -> Self {
        Self {
            prefixes,
            models: Vec::new(),
        }
    }

    #[must_use]
    pub fn model(mut self, model: ModelBuilder) -> Self {
        self.models.push(model);
        self
    }

    /// Resolves all relations and predicates.
    ///
    /// Fails if a name is not an identifier, a relation targets an unknown model, or an inverse
    /// relation does not originate from a forward relation pointing back at its owner.
    pub fn build(self) -> OdmResult<Schema> {
        let mut names = HashSet::new();
        for model in &self.models {
            validate_name(&model.name)?;
            if !names.insert(model.name.as_str()) {
                return invalid(format!("Model '{}' is defined twice", model.name));
            }
        }

        // Forward predicates first, as inverse relations borrow the predicate of their origin.
        let mut forward = HashMap::new();
        for model in &self.models {
            let mut seen = HashSet::new();
            for property in &model.properties {
                validate_name(&property.name)?;
                if !seen.insert(property.name.as_str()) {
                    return invalid(format!(
                        "Property '{}' is defined twice on '{}'",
                        property.name, model.name
                    ));
                }
                if let PropertyTarget::Model(target) = &property.target {
                    if !names.contains(target.as_str()) {
                        return invalid(format!(
                            "Property '{}.{}' references unknown model '{target}'",
                            model.name, property.name
                        ));
                    }
                }
                if property.inverse_of.is_none() {
                    let predicate = match &property.predicate {
                        Some(predicate) => NamedNode::new(predicate.clone())?,
                        None => NamedNode::new(format!(
                            "{}{}/{}",
                            self.prefixes.property, model.name, property.name
                        ))?,
                    };
                    forward.insert(qualified(&model.name, &property.name), predicate);
                }
            }
        }

        let mut models = Vec::with_capacity(self.models.len());
        for model in &self.models {
            let mut properties = BTreeMap::new();
            for property in &model.properties {
                let descriptor = self.resolve_property(model, property, &forward)?;
                properties.insert(property.name.clone(), descriptor);
            }

            let class_uri = match &model.class_uri {
                Some(class_uri) => NamedNode::new(class_uri.clone())?,
                None => NamedNode::new(format!("{}{}", self.prefixes.class, model.name))?,
            };
            let instance_prefix = model.instance_prefix.clone().unwrap_or_else(|| {
                format!(
                    "{}{}/",
                    self.prefixes.instance,
                    model.name.to_ascii_lowercase()
                )
            });
            models.push(ModelDefinition::new(
                model.name.clone(),
                class_uri,
                instance_prefix,
                properties,
            ));
        }

        Ok(Schema::new(models))
    }

    fn resolve_property(
        &self,
        model: &ModelBuilder,
        property: &PropertyDefinition,
        forward: &HashMap<String, NamedNode>,
    ) -> OdmResult<PropertyDescriptor> {
        let kind = match (&property.target, &property.inverse_of) {
            (PropertyTarget::Scalar(kind), None) => PropertyKind::Scalar(*kind),
            (PropertyTarget::Scalar(_), Some(_)) => {
                return invalid(format!(
                    "Scalar property '{}.{}' cannot be an inverse relation",
                    model.name, property.name
                ));
            }
            (PropertyTarget::Model(target), None) => PropertyKind::Relation {
                model: target.clone(),
            },
            (PropertyTarget::Model(target), Some(origin)) => {
                self.validate_inverse_origin(model, target, origin)?;
                PropertyKind::InverseRelation {
                    model: target.clone(),
                    property: origin.clone(),
                }
            }
        };

        let predicate = match &kind {
            PropertyKind::InverseRelation {
                model: origin_model,
                property: origin_property,
            } => forward.get(&qualified(origin_model, origin_property)),
            _ => forward.get(&qualified(&model.name, &property.name)),
        };
        let Some(predicate) = predicate else {
            return invalid(format!(
                "No predicate could be determined for '{}.{}'",
                model.name, property.name
            ));
        };

        Ok(PropertyDescriptor::new(
            property.name.clone(),
            predicate.clone(),
            kind,
            property.array,
        ))
    }

    fn validate_inverse_origin(
        &self,
        model: &ModelBuilder,
        target: &str,
        origin: &str,
    ) -> OdmResult<()> {
        let origin_definition = self
            .models
            .iter()
            .find(|m| m.name == target)
            .and_then(|m| m.properties.iter().find(|p| p.name == origin));
        match origin_definition {
            Some(PropertyDefinition {
                target: PropertyTarget::Model(points_at),
                inverse_of: None,
                ..
            }) if *points_at == model.name => Ok(()),
            _ => invalid(format!(
                "Inverse relation on '{}' requires '{target}.{origin}' to be a relation to '{}'",
                model.name, model.name
            )),
        }
    }
}

fn validate_name(name: &str) -> OdmResult<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        invalid(format!("'{name}' is not a valid identifier"))
    }
}

fn qualified(model: &str, property: &str) -> String {
    format!("{model}.{property}")
}

fn invalid<T>(reason: String) -> OdmResult<T> {
    Err(OdmError::InvalidSchema(reason))
}
