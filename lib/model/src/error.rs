use oxiri::IriParseError;
use oxrdf::VariableNameParseError;
use sparesults::QueryResultsParseError;
use std::io;

/// The result type used throughout the object-document mapper.
pub type OdmResult<T> = Result<T, OdmError>;

/// An error raised while compiling a query or an update, or while decoding results.
///
/// All compilation errors are raised before any text is rendered. A failed compilation never
/// yields a partial query.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OdmError {
    /// The property path does not resolve for the given model.
    #[error("The property '{path}' is not defined on model '{model}'")]
    UnknownProperty { model: String, path: String },
    /// The model is not registered in the schema.
    #[error("The model '{0}' is not registered")]
    UnknownModel(String),
    /// The aggregator name is not one of count, avg, sum, min, max, array, or object.
    #[error("Unknown aggregator '{0}'")]
    UnknownAggregator(String),
    /// The filter operator is not supported.
    #[error("Unknown filter operator '{0}'")]
    UnknownOperator(String),
    /// A sort directive names neither a projected field nor an aggregate.
    #[error("Cannot sort by '{0}' as it is neither a projected field nor an aggregate")]
    UnknownSortTarget(String),
    /// The sort directive is not a list.
    #[error("Sort directives must be a list of names, got {0}")]
    InvalidSortInput(String),
    /// The URI does not start with the instance prefix of the model.
    #[error("The URI <{uri}> is not an instance URI of model '{model}'")]
    MalformedUri { model: String, uri: String },
    /// A document is missing its `_id` or `_type`.
    #[error("The document must carry both an '_id' and a '_type'")]
    MissingIdentity,
    /// A value cannot be encoded for the kind of its property.
    #[error("Invalid value for '{path}': {reason}")]
    InvalidValue { path: String, reason: String },
    /// The declarative query shape is malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// The schema definition is inconsistent.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
    #[error(transparent)]
    Iri(#[from] IriParseError),
    #[error(transparent)]
    Variable(#[from] VariableNameParseError),
    /// The configuration could not be deserialized.
    #[error(transparent)]
    Config(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    /// An error while parsing a SPARQL results document.
    #[error(transparent)]
    Results(#[from] QueryResultsParseError),
}

impl OdmError {
    /// Creates a result with an [OdmError::InvalidValue].
    pub fn invalid_value<T>(path: impl Into<String>, reason: impl Into<String>) -> OdmResult<T> {
        Err(OdmError::InvalidValue {
            path: path.into(),
            reason: reason.into(),
        })
    }

    /// Creates a result with an [OdmError::InvalidQuery].
    pub fn invalid_query<T>(reason: impl Into<String>) -> OdmResult<T> {
        Err(OdmError::InvalidQuery(reason.into()))
    }
}
