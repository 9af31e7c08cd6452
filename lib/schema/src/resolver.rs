use crate::descriptor::PropertyDescriptor;
use crate::path::PropertyPath;
use crate::schema::ModelDefinition;
use rdf_odm_model::{OdmError, OdmResult, ID_FIELD, TYPE_FIELD};

/// Resolves model names and property paths to their schema definitions.
///
/// The query and update compilers only consume this interface. Implementations must not change
/// while a compilation is running.
pub trait PropertyResolver: Send + Sync {
    /// Returns the definition of the model called `name`.
    fn model(&self, name: &str) -> OdmResult<&ModelDefinition>;

    /// Returns the model whose class URI is `class_uri`.
    fn model_for_class(&self, class_uri: &str) -> OdmResult<&ModelDefinition>;

    /// Returns the property `name` declared directly on `model`.
    fn property(&self, model: &str, name: &str) -> OdmResult<&PropertyDescriptor> {
        self.model(model)?
            .property(name)
            .ok_or_else(|| OdmError::UnknownProperty {
                model: model.to_owned(),
                path: name.to_owned(),
            })
    }

    /// Resolves every segment of `path`, starting at `model` and following relations.
    ///
    /// `_id` and `_type` are only allowed as the last segment. Traversing through a scalar
    /// property fails with [OdmError::UnknownProperty].
    fn resolve_path(&self, model: &str, path: &PropertyPath) -> OdmResult<ResolvedPath<'_>> {
        let root = self.model(model)?;
        let unknown = || OdmError::UnknownProperty {
            model: model.to_owned(),
            path: path.to_string(),
        };

        let segments = path.segments();
        let mut steps = Vec::with_capacity(segments.len());
        let mut current = root;
        for (idx, segment) in segments.iter().enumerate() {
            let is_last = idx + 1 == segments.len();
            let target = match segment.as_str() {
                ID_FIELD if is_last => StepTarget::Identity,
                TYPE_FIELD if is_last => StepTarget::Type,
                ID_FIELD | TYPE_FIELD => return Err(unknown()),
                name => StepTarget::Property(current.property(name).ok_or_else(unknown)?),
            };
            steps.push(PathStep {
                owner: current,
                target,
            });

            if !is_last {
                let related = match target {
                    StepTarget::Property(property) => property.related_model(),
                    StepTarget::Identity | StepTarget::Type => None,
                };
                current = self.model(related.ok_or_else(unknown)?)?;
            }
        }

        Ok(ResolvedPath { root, steps })
    }
}

/// What a single path segment addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepTarget<'schema> {
    /// `_id`: the identity of the owning entity.
    Identity,
    /// `_type`: the class of the owning entity.
    Type,
    Property(&'schema PropertyDescriptor),
}

/// One resolved segment and the model that declares it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathStep<'schema> {
    pub owner: &'schema ModelDefinition,
    pub target: StepTarget<'schema>,
}

impl<'schema> PathStep<'schema> {
    pub fn property(&self) -> Option<&'schema PropertyDescriptor> {
        match self.target {
            StepTarget::Property(property) => Some(property),
            StepTarget::Identity | StepTarget::Type => None,
        }
    }
}

/// A property path whose segments have all been resolved against the schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath<'schema> {
    root: &'schema ModelDefinition,
    steps: Vec<PathStep<'schema>>,
}

impl<'schema> ResolvedPath<'schema> {
    pub fn root(&self) -> &'schema ModelDefinition {
        self.root
    }

    pub fn steps(&self) -> &[PathStep<'schema>] {
        &self.steps
    }

    /// The last step, or `None` for the root path.
    pub fn terminal(&self) -> Option<&PathStep<'schema>> {
        self.steps.last()
    }

    /// The terminal property, if the path ends in a regular property.
    pub fn property(&self) -> Option<&'schema PropertyDescriptor> {
        self.terminal().and_then(PathStep::property)
    }

    /// The name of the model whose instances this path points at.
    ///
    /// This is the root model for the root path, the owner for `x._id`, and the related model for
    /// a relation. Scalars and `_type` do not point at instances.
    pub fn entity_model(&self) -> Option<&'schema str> {
        let Some(terminal) = self.terminal() else {
            return Some(self.root.name());
        };
        match terminal.target {
            StepTarget::Identity => Some(terminal.owner.name()),
            StepTarget::Type => None,
            StepTarget::Property(property) => property.related_model(),
        }
    }
}
