mod algebra;
mod compiler;
mod condition;
mod decoder;
mod parse;
mod spec;

pub use algebra::*;
pub use compiler::{CompilerOptions, FullTextSearch, QueryCompiler};
pub use condition::{Condition, Operator, Polarity};
pub use decoder::ResultDecoder;
pub use spec::*;
