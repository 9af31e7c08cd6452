use crate::config::OdmConfig;
use rdf_odm_model::{Document, NamedNode, OdmError, OdmResult};
use rdf_odm_query::{
    CompilerOptions, FullTextSearch, QueryCompiler, QuerySpec, ResultDecoder, SelectAlgebra,
};
use rdf_odm_schema::Schema;
use rdf_odm_update::UpdateCompiler;
use sparesults::{
    QueryResultsFormat, QueryResultsParser, QuerySolution, ReaderQueryResultsParserOutput,
};
use spargebra::{Query, Update};
use std::fmt::{Display, Formatter};
use std::io::Read;
use std::sync::Arc;

/// Maps documents of a [Schema] to SPARQL queries and updates, and result rows back to documents.
///
/// The mapper never talks to a store. Executing the compiled text is up to the caller.
///
/// ```
/// use rdf_odm::ObjectMapper;
/// use rdf_odm::query::QuerySpec;
/// use rdf_odm::schema::{ModelBuilder, ScalarKind, Schema, UriPrefixes};
/// use std::sync::Arc;
///
/// let schema = Schema::builder(UriPrefixes::from_base("http://example.org/"))
///     .model(ModelBuilder::new("User").scalar("name", ScalarKind::String))
///     .build()?;
/// let mapper = ObjectMapper::new(Arc::new(schema));
///
/// let spec = QuerySpec::new().field("_id", "_id").field("name", "name").limit(10);
/// let query = mapper.compile_query("User", &spec)?;
/// assert!(query.to_sparql().contains("LIMIT 10"));
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
#[derive(Clone, Debug)]
pub struct ObjectMapper {
    schema: Arc<Schema>,
    options: CompilerOptions,
}

impl ObjectMapper {
    /// Creates a mapper over `schema` that works on the default graph.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            options: CompilerOptions::default(),
        }
    }

    /// Creates a mapper from a configuration file's content.
    pub fn from_config(config: OdmConfig) -> OdmResult<Self> {
        let graph = config.graph()?;
        let mapper = Self::new(Arc::new(config.into_schema()?));
        Ok(match graph {
            Some(graph) => mapper.with_graph(graph),
            None => mapper,
        })
    }

    /// Scopes all queries and updates to `graph`.
    #[must_use]
    pub fn with_graph(mut self, graph: NamedNode) -> Self {
        self.options.graph = Some(graph);
        self
    }

    /// Replaces the predicates used by `$search`.
    #[must_use]
    pub fn with_full_text_search(mut self, full_text: FullTextSearch) -> Self {
        self.options.full_text = full_text;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn graph(&self) -> Option<&NamedNode> {
        self.options.graph.as_ref()
    }

    pub fn compile_query(&self, model: &str, spec: &QuerySpec) -> OdmResult<CompiledQuery> {
        let algebra = QueryCompiler::new(self.schema.as_ref(), &self.options).compile(model, spec)?;
        let query = algebra.to_query();
        Ok(CompiledQuery { algebra, query })
    }

    /// Decodes one result row of the query compiled from `spec`.
    pub fn decode_solution(
        &self,
        model: &str,
        spec: &QuerySpec,
        solution: &QuerySolution,
    ) -> OdmResult<Document> {
        ResultDecoder::new(self.schema.as_ref(), model, spec)?.decode_solution(solution)
    }

    /// Decodes a complete SPARQL JSON results document.
    pub fn decode_results(
        &self,
        model: &str,
        spec: &QuerySpec,
        reader: impl Read,
    ) -> OdmResult<Vec<Document>> {
        let decoder = ResultDecoder::new(self.schema.as_ref(), model, spec)?;
        let parser = QueryResultsParser::from_format(QueryResultsFormat::Json);
        let ReaderQueryResultsParserOutput::Solutions(solutions) = parser.for_reader(reader)?
        else {
            return OdmError::invalid_query("expected solutions, got a boolean result");
        };

        let mut documents = Vec::new();
        for solution in solutions {
            documents.push(decoder.decode_solution(&solution?)?);
        }
        tracing::debug!("Decoded {} documents of model '{model}'", documents.len());
        Ok(documents)
    }

    /// Inserts a new document.
    pub fn save(&self, document: &Document) -> OdmResult<Update> {
        self.update_compiler().build_save(document)
    }

    /// Replaces a document as a whole. Properties missing from `document` are removed.
    pub fn replace(&self, document: &Document) -> OdmResult<Update> {
        self.update_compiler().build_replace(document)
    }

    /// Deletes every statement about a document.
    pub fn delete(&self, document: &Document) -> OdmResult<Update> {
        self.update_compiler().build_delete(document)
    }

    fn update_compiler(&self) -> UpdateCompiler<'_> {
        UpdateCompiler::new(self.schema.as_ref(), self.options.graph.as_ref())
    }
}

/// A compiled `SELECT` query.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    algebra: SelectAlgebra,
    query: Query,
}

impl CompiledQuery {
    pub fn algebra(&self) -> &SelectAlgebra {
        &self.algebra
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Renders the query as SPARQL text.
    pub fn to_sparql(&self) -> String {
        self.query.to_string()
    }
}

impl Display for CompiledQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.query, f)
    }
}
