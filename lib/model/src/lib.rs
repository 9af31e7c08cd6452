mod document;
mod error;
pub mod vocab;

pub use document::*;
pub use error::*;

// Re-export some oxrdf types.
pub use oxrdf::{
    BlankNode, IriParseError, Literal, LiteralRef, NamedNode, NamedNodeRef, Term, TermRef,
    Variable, VariableNameParseError, VariableRef,
};
