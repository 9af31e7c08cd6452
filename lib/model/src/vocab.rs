pub use oxrdf::vocab::{rdf, xsd};

/// [Blazegraph](https://github.com/blazegraph/database/wiki/FullTextSearch) full-text search
/// vocabulary.
pub mod bds {
    use oxrdf::NamedNodeRef;

    /// Binds literals that match the given search text.
    pub const SEARCH: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.bigdata.com/rdf/search#search");
    /// Requires every term of the search text to match.
    pub const MATCH_ALL_TERMS: NamedNodeRef<'_> =
        NamedNodeRef::new_unchecked("http://www.bigdata.com/rdf/search#matchAllTerms");
}
