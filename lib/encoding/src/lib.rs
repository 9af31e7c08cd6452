//! Converts between document values and RDF terms.
//!
//! The [ValueCodec] mints class and instance URIs and encodes scalar values as typed literals. The
//! [variables] module defines the variable naming that the query compiler and the result decoder
//! share. [packing] defines how array values travel through a single result column.

mod codec;
mod datetime;
pub mod packing;
pub mod variables;

pub use codec::{decode_lexical, decode_literal, encode_scalar, ValueCodec};
pub use datetime::{format_datetime, normalize_datetime, parse_datetime};
