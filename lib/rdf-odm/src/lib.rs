#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod config;
mod mapper;

pub use config::{ModelConfig, OdmConfig, PropertyConfig};
pub use mapper::{CompiledQuery, ObjectMapper};

pub mod model {
    pub use rdf_odm_model::*;
}

pub mod schema {
    pub use rdf_odm_schema::*;
}

pub mod encoding {
    pub use rdf_odm_encoding::*;
}

pub mod query {
    pub use rdf_odm_query::*;
}

pub mod update {
    pub use rdf_odm_update::*;
}
