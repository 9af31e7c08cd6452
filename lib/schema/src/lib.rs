mod builder;
mod descriptor;
mod path;
mod resolver;
mod schema;

pub use builder::{ModelBuilder, PropertyDefinition, SchemaBuilder, UriPrefixes};
pub use descriptor::{PropertyDescriptor, PropertyKind, ScalarKind};
pub use path::PropertyPath;
pub use resolver::{PathStep, PropertyResolver, ResolvedPath, StepTarget};
pub use schema::{ModelDefinition, Schema};
