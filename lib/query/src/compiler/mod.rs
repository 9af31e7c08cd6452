mod filter;
mod pattern;
mod projection;

use crate::algebra::{PatternElement, Projection, SelectAlgebra};
use crate::compiler::filter::FilterCompiler;
use crate::compiler::projection::ProjectionCompiler;
use crate::spec::{QuerySpec, SortDirection};
use rdf_odm_encoding::variables::{output_variable, root_variable};
use rdf_odm_encoding::ValueCodec;
use rdf_odm_model::vocab::{bds, rdf};
use rdf_odm_model::{NamedNode, OdmError, OdmResult};
use rdf_odm_schema::PropertyResolver;
use spargebra::algebra::{Expression, OrderExpression};

/// The predicates of the full-text search extension used by `$search`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullTextSearch {
    /// Binds the literals matching a search text.
    pub search: NamedNode,
    /// Requires that every term of the search text matches.
    pub match_all_terms: NamedNode,
}

impl Default for FullTextSearch {
    fn default() -> Self {
        Self {
            search: bds::SEARCH.into_owned(),
            match_all_terms: bds::MATCH_ALL_TERMS.into_owned(),
        }
    }
}

/// Options that apply to every compiled query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Scopes the `WHERE` clause to this named graph.
    pub graph: Option<NamedNode>,
    pub full_text: FullTextSearch,
}

/// Compiles declarative [QuerySpec]s into [SelectAlgebra].
///
/// The compiler only reads the schema, so one compiler can be shared by many threads.
#[derive(Clone, Copy)]
pub struct QueryCompiler<'schema> {
    codec: ValueCodec<'schema>,
    options: &'schema CompilerOptions,
}

impl<'schema> QueryCompiler<'schema> {
    pub fn new(resolver: &'schema dyn PropertyResolver, options: &'schema CompilerOptions) -> Self {
        Self {
            codec: ValueCodec::new(resolver),
            options,
        }
    }

    /// Compiles `spec`, a query over the documents of `model`.
    ///
    /// Fails without producing any output if a path, an operator or a sort target is unknown.
    pub fn compile(&self, model: &str, spec: &QuerySpec) -> OdmResult<SelectAlgebra> {
        spec.validate_names()?;
        let spec = &spec.normalized(self.codec.resolver(), model)?;
        let class = self.codec.class_uri(model)?;
        for directive in &spec.sort {
            if !spec.fields.contains_key(&directive.target)
                && !spec.aggregates.contains_key(&directive.target)
            {
                return Err(OdmError::UnknownSortTarget(directive.target.clone()));
            }
        }

        let projection = ProjectionCompiler::new(self.codec, model).compile(spec)?;
        let filters = match &spec.filter {
            Some(condition) => FilterCompiler::new(
                self.codec,
                model,
                &projection.projected,
                &self.options.full_text,
            )
            .compile(&condition.clone().eliminate_not())?,
            None => Vec::new(),
        };

        let mut required = vec![PatternElement::triple(
            root_variable(),
            rdf::TYPE.into_owned(),
            class,
        )];
        required.extend(projection.required);

        let grouped = projection.projection.iter().any(Projection::is_aggregated);
        let group_by = if grouped {
            projection
                .projection
                .iter()
                .filter_map(|column| match column {
                    Projection::Variable(variable) => Some(variable.clone()),
                    Projection::Aggregate { .. } | Projection::Packed { .. } => None,
                })
                .collect()
        } else {
            Vec::new()
        };

        let order_by = spec
            .sort
            .iter()
            .map(|directive| {
                let variable = Expression::Variable(output_variable(&directive.target)?);
                Ok(match directive.direction {
                    SortDirection::Ascending => OrderExpression::Asc(variable),
                    SortDirection::Descending => OrderExpression::Desc(variable),
                })
            })
            .collect::<OdmResult<Vec<_>>>()?;

        let algebra = SelectAlgebra {
            projection: projection.projection,
            required,
            filters,
            optionals: projection.optionals,
            bindings: projection.bindings,
            group_by,
            order_by,
            limit: spec.limit,
            offset: spec.offset.unwrap_or(0),
            distinct: spec.distinct,
            graph: self.options.graph.clone(),
        };
        tracing::debug!("Compiled query over '{model}': {}", algebra.to_query());
        Ok(algebra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Operator};
    use crate::spec::{Aggregation, Aggregator};
    use insta::assert_snapshot;
    use rdf_odm_schema::{ModelBuilder, PropertyDefinition, ScalarKind, Schema, UriPrefixes};
    use serde_json::json;
    use spargebra::algebra::GraphPattern;
    use spargebra::Query;

    fn schema() -> Schema {
        Schema::builder(UriPrefixes::from_base("http://example.org/"))
            .model(
                ModelBuilder::new("User")
                    .scalar("name", ScalarKind::String)
                    .scalar("age", ScalarKind::Number)
                    .property(PropertyDefinition::inverse("posts", "BlogPost", "author").array()),
            )
            .model(
                ModelBuilder::new("BlogPost")
                    .scalar("title", ScalarKind::String)
                    .scalar("views", ScalarKind::Number)
                    .relation("author", "User")
                    .property(PropertyDefinition::scalar("tags", ScalarKind::String).array()),
            )
            .build()
            .unwrap()
    }

    fn compile(spec: &QuerySpec) -> OdmResult<SelectAlgebra> {
        let schema = schema();
        let options = CompilerOptions::default();
        QueryCompiler::new(&schema, &options).compile("BlogPost", spec)
    }

    /// Renders the query and parses it back, which fails on invalid SPARQL.
    fn reparse(algebra: &SelectAlgebra) -> String {
        let text = algebra.to_query().to_string();
        Query::parse(&text, None).unwrap();
        text
    }

    /// Like [reparse], with the IRIs of the test schema shortened and path separators shown as
    /// dots.
    fn sparql(algebra: &SelectAlgebra) -> String {
        reparse(algebra)
            .replace("http://www.w3.org/1999/02/22-rdf-syntax-ns#type", "rdf:type")
            .replace("http://www.w3.org/2001/XMLSchema#", "xsd:")
            .replace("http://example.org/classes/", "c:")
            .replace("http://example.org/properties/", "p:")
            .replace('\u{b7}', ".")
    }

    fn compile_user(spec: &QuerySpec) -> OdmResult<SelectAlgebra> {
        let schema = schema();
        let options = CompilerOptions::default();
        QueryCompiler::new(&schema, &options).compile("User", spec)
    }

    fn contains_exists(elements: &[PatternElement]) -> bool {
        elements.iter().any(|element| {
            matches!(
                element,
                PatternElement::Filter(Expression::Exists(_) | Expression::Not(_))
            )
        })
    }

    #[test]
    fn anchor_triple_comes_first() -> OdmResult<()> {
        let algebra = compile(&QuerySpec::new().field("title", "title"))?;
        assert!(matches!(
            &algebra.required[0],
            PatternElement::Triple(triple)
                if triple.object.to_string() == "<http://example.org/classes/BlogPost>"
        ));
        assert!(!algebra.is_grouped());
        assert!(algebra.group_by.is_empty());
        reparse(&algebra);
        Ok(())
    }

    #[test]
    fn unknown_sort_target_is_rejected() {
        let spec = QuerySpec::new().field("title", "title").sort("-views");
        assert!(matches!(
            compile(&spec),
            Err(OdmError::UnknownSortTarget(target)) if target == "views"
        ));
    }

    #[test]
    fn unknown_paths_are_rejected() {
        let spec = QuerySpec::new().field("title", "author.nickname");
        assert!(matches!(
            compile(&spec),
            Err(OdmError::UnknownProperty { .. })
        ));

        let spec = QuerySpec::new().filter(Condition::equals("subtitle", json!("x")));
        assert!(matches!(
            compile(&spec),
            Err(OdmError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn aggregates_group_by_plain_fields() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("author", "author._id")
            .aggregate("total", Aggregation::new(Aggregator::Sum, Some("views")))
            .aggregate("posts", Aggregation::count())
            .sort("-total");
        let algebra = compile(&spec)?;
        assert!(algebra.is_grouped());
        assert_eq!(algebra.group_by, vec![output_variable("author")?]);

        let text = reparse(&algebra);
        assert!(text.contains("GROUP BY"));
        assert!(text.contains("DESC"));
        Ok(())
    }

    #[test]
    fn array_columns_carry_their_own_patterns() -> OdmResult<()> {
        // `tags` is an array property, so the scalar selector is projected as an array.
        let algebra = compile(&QuerySpec::new().field("title", "title").field("tags", "tags"))?;
        assert!(algebra.is_grouped());
        assert_eq!(algebra.group_by, vec![output_variable("title")?]);
        assert!(algebra.optionals.is_empty());
        assert!(matches!(
            algebra.projection.as_slice(),
            [Projection::Packed { values, .. }, Projection::Variable(_)] if values.len() == 2
        ));

        let text = reparse(&algebra);
        assert!(text.contains("GROUP_CONCAT"));
        Ok(())
    }

    #[test]
    fn value_columns_do_not_multiply_each_other() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("title", "title")
            .array_field("tags", "tags")
            .aggregate("total", Aggregation::new(Aggregator::Sum, Some("views")));
        assert_snapshot!(
            sparql(&compile(&spec)?),
            @r#"SELECT ?tags ?title ?total WHERE { {SELECT ?title WHERE { ?_root <rdf:type> <c:BlogPost> .?_root <p:BlogPost/title> ?_p.title . BIND(?_p.title AS ?title) } GROUP BY ?title} {SELECT (GROUP_CONCAT(DISTINCT ?_e.tags; SEPARATOR = "\", \"") AS ?_g.tags) ?title WHERE { { SELECT DISTINCT ?title ?_root WHERE { ?_root <rdf:type> <c:BlogPost> .?_root <p:BlogPost/title> ?_p.title . BIND(?_p.title AS ?title) } } OPTIONAL { ?_root <p:BlogPost/tags> ?_p.tags . BIND(ENCODE_FOR_URI(STR(?_p.tags)) AS ?_e.tags) } } GROUP BY ?title} {SELECT (SUM(?_p.views) AS ?total) ?title WHERE { { SELECT DISTINCT ?title ?_root WHERE { ?_root <rdf:type> <c:BlogPost> .?_root <p:BlogPost/title> ?_p.title . BIND(?_p.title AS ?title) } } OPTIONAL { ?_root <p:BlogPost/views> ?_p.views . } } GROUP BY ?title} BIND(CONCAT("[\"", ?_g.tags, "\"]") AS ?tags) }"#
        );
        Ok(())
    }

    #[test]
    fn aggregates_over_an_inverse_relation() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .aggregate("n", Aggregation::new(Aggregator::Count, Some("posts")))
            .aggregate("v", Aggregation::new(Aggregator::Sum, Some("posts.views")));
        let algebra = compile_user(&spec)?;
        assert!(algebra.group_by.is_empty());
        assert_snapshot!(
            sparql(&algebra),
            @r#"SELECT ?n ?v WHERE { {SELECT (COUNT(?_p.posts) AS ?n) WHERE { { SELECT DISTINCT ?_root WHERE { ?_root <rdf:type> <c:User> . } } OPTIONAL { ?_root ^(<p:BlogPost/author>) ?_p.posts . ?_p.posts <rdf:type> <c:BlogPost> . } }} {SELECT (SUM(?_p.posts.views) AS ?v) WHERE { { SELECT DISTINCT ?_root WHERE { ?_root <rdf:type> <c:User> . } } OPTIONAL { ?_root ^(<p:BlogPost/author>) ?_p.posts . ?_p.posts <rdf:type> <c:BlogPost> .?_p.posts <p:BlogPost/views> ?_p.posts.views . } }} }"#
        );
        Ok(())
    }

    #[test]
    fn optional_fields_are_coalesced() -> OdmResult<()> {
        let algebra = compile(&QuerySpec::new().field("authorName", "author.?name"))?;
        assert_eq!(algebra.optionals.len(), 1);
        assert!(algebra.bindings.iter().any(|binding| matches!(
            binding,
            PatternElement::Bind { expression: Expression::Coalesce(_), .. }
        )));
        reparse(&algebra);
        Ok(())
    }

    #[test]
    fn equality_on_unprojected_path_is_inlined() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("title", "title")
            .filter(Condition::equals("author._id", json!("user1")));
        let algebra = compile(&spec)?;
        assert!(!contains_exists(&algebra.filters));
        assert!(matches!(
            algebra.filters.as_slice(),
            [PatternElement::Triple(triple)]
                if triple.object.to_string() == "<http://example.org/instances/user/user1>"
        ));
        reparse(&algebra);
        Ok(())
    }

    #[test]
    fn equality_on_projected_path_uses_exists() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("title", "title")
            .filter(Condition::equals("title", json!("Hello")));
        let algebra = compile(&spec)?;
        assert!(contains_exists(&algebra.filters));
        reparse(&algebra);
        Ok(())
    }

    #[test]
    fn exists_false_equals_not_exists() -> OdmResult<()> {
        let exists_false = QuerySpec::new().field("title", "title").filter(Condition::compare(
            "author",
            Operator::Exists,
            json!(false),
        ));
        let not_exists = QuerySpec::new().field("title", "title").filter(Condition::compare(
            "author",
            Operator::NotExists,
            json!(true),
        ));
        assert_eq!(compile(&exists_false)?, compile(&not_exists)?);
        Ok(())
    }

    #[test]
    fn negated_comparisons_use_not_exists() -> OdmResult<()> {
        let spec = QuerySpec::new().field("title", "title").filter(Condition::compare(
            "views",
            Operator::Ne,
            json!(10),
        ));
        let text = reparse(&compile(&spec)?);
        assert!(text.contains("NOT EXISTS"));
        Ok(())
    }

    #[test]
    fn negated_ranges_are_inverted() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("title", "title")
            .filter(Condition::Not(Box::new(Condition::compare(
                "views",
                Operator::Gt,
                json!(10),
            ))));
        let text = reparse(&compile(&spec)?);
        assert!(text.contains("<="));
        assert!(!text.contains("NOT EXISTS"));
        Ok(())
    }

    #[test]
    fn inverse_properties_use_a_reverse_path() -> OdmResult<()> {
        let schema = schema();
        let options = CompilerOptions::default();
        let spec = QuerySpec::new()
            .field("name", "name")
            .array_field("titles", "posts.title");
        let algebra = QueryCompiler::new(&schema, &options).compile("User", &spec)?;
        let has_path = |elements: &[PatternElement]| {
            elements
                .iter()
                .any(|element| matches!(element, PatternElement::Path { .. }))
        };
        assert!(algebra.projection.iter().any(|column| matches!(
            column,
            Projection::Packed { values, .. } if has_path(values)
        )));
        reparse(&algebra);
        Ok(())
    }

    #[test]
    fn or_branches_bind_the_root() -> OdmResult<()> {
        let spec = QuerySpec::new().field("title", "title").filter(Condition::Or(vec![
            Condition::equals("tags", json!("rust")),
            Condition::compare("views", Operator::Gte, json!(100)),
        ]));
        let algebra = compile(&spec)?;
        let [PatternElement::Union(branches)] = algebra.filters.as_slice() else {
            panic!("expected a single union, got {:?}", algebra.filters);
        };
        assert_eq!(branches.len(), 2);
        for branch in branches {
            assert!(matches!(branch.first(), Some(PatternElement::Triple(_))));
        }
        reparse(&algebra);
        Ok(())
    }

    #[test]
    fn graph_scopes_the_where_clause() -> OdmResult<()> {
        let schema = schema();
        let options = CompilerOptions {
            graph: Some(NamedNode::new_unchecked("http://example.org/graph")),
            ..CompilerOptions::default()
        };
        let spec = QuerySpec::new().field("title", "title").limit(10).offset(20);
        let algebra = QueryCompiler::new(&schema, &options).compile("BlogPost", &spec)?;
        let Query::Select { pattern, .. } = algebra.to_query() else {
            panic!("expected a select query");
        };
        assert!(matches!(
            pattern,
            GraphPattern::Slice { start: 20, length: Some(10), .. }
        ));
        assert!(reparse(&algebra).contains("GRAPH <http://example.org/graph>"));
        Ok(())
    }

    #[test]
    fn search_uses_full_text_predicates() -> OdmResult<()> {
        let spec = QuerySpec::new().field("title", "title").filter(Condition::compare(
            "title",
            Operator::Search,
            json!("graph databases"),
        ));
        let text = reparse(&compile(&spec)?);
        assert!(text.contains("<http://www.bigdata.com/rdf/search#search>"));
        assert!(text.contains("<http://www.bigdata.com/rdf/search#matchAllTerms>"));
        Ok(())
    }

    #[test]
    fn in_and_nin() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("title", "title")
            .filter(Condition::compare("views", Operator::In, json!([1, 2])))
            .filter(Condition::compare("title", Operator::Nin, json!(["a", "b"])));
        assert_snapshot!(
            sparql(&compile(&spec)?),
            @r#"SELECT ?title WHERE { ?_root <rdf:type> <c:BlogPost> .?_root <p:BlogPost/title> ?_p.title . BIND(?_p.title AS ?title) FILTER((EXISTS { ?_root <p:BlogPost/views> ?_filter0.views . FILTER((?_filter0.views IN ("1"^^<xsd:integer>, "2"^^<xsd:integer>))) } && NOT EXISTS { ?_root <p:BlogPost/title> ?_filter1.title . FILTER((?_filter1.title IN ("a", "b"))) })) }"#
        );
        Ok(())
    }

    #[test]
    fn regex_and_string_length() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("title", "title")
            .filter(Condition::compare("title", Operator::Regex, json!("^Hel")))
            .filter(Condition::compare("title", Operator::IRegex, json!("world")))
            .filter(Condition::compare("title", Operator::StrLen, json!(5)));
        assert_snapshot!(
            sparql(&compile(&spec)?),
            @r#"SELECT ?title WHERE { ?_root <rdf:type> <c:BlogPost> .?_root <p:BlogPost/title> ?_p.title . BIND(?_p.title AS ?title) FILTER(((EXISTS { ?_root <p:BlogPost/title> ?_filter0.title . FILTER(REGEX(STR(?_filter0.title), "^Hel")) } && EXISTS { ?_root <p:BlogPost/title> ?_filter1.title . FILTER(REGEX(STR(?_filter1.title), "world", "i")) }) && EXISTS { ?_root <p:BlogPost/title> ?_filter2.title . FILTER((STRLEN(STR(?_filter2.title)) = "5"^^<xsd:integer>)) })) }"#
        );
        Ok(())
    }

    #[test]
    fn all_values_are_required() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("title", "title")
            .filter(Condition::compare("tags", Operator::All, json!(["a", "b"])));
        assert_snapshot!(
            sparql(&compile(&spec)?),
            @r#"SELECT ?title WHERE { ?_root <rdf:type> <c:BlogPost> .?_root <p:BlogPost/title> ?_p.title .?_root <p:BlogPost/tags> "a" .?_root <p:BlogPost/tags> "b" . BIND(?_p.title AS ?title) }"#
        );
        Ok(())
    }

    #[test]
    fn filter_through_an_inverse_relation() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("name", "name")
            .filter(Condition::equals("posts.title", json!("Hello")));
        assert_snapshot!(
            sparql(&compile_user(&spec)?),
            @r#"SELECT ?name WHERE { ?_root <rdf:type> <c:User> .?_root <p:User/name> ?_p.name . ?_root ^(<p:BlogPost/author>) ?_filter0.posts . ?_filter0.posts <rdf:type> <c:BlogPost> .?_filter0.posts <p:BlogPost/title> "Hello" . BIND(?_p.name AS ?name) }"#
        );
        Ok(())
    }

    #[test]
    fn identity_only_projection() -> OdmResult<()> {
        let algebra = compile(&QuerySpec::new().field("_id", "_id"))?;
        assert_snapshot!(
            sparql(&algebra),
            @"SELECT ?_id WHERE { ?_root <rdf:type> <c:BlogPost> . BIND(?_root AS ?_id) }"
        );
        // A query without fields projects the identity instead of every variable.
        assert_eq!(compile(&QuerySpec::new())?, algebra);
        Ok(())
    }

    #[test]
    fn existence_of_the_document_itself() -> OdmResult<()> {
        let exists = QuerySpec::new().filter(Condition::compare("_id", Operator::Exists, json!(true)));
        assert_eq!(compile(&exists)?, compile(&QuerySpec::new())?);

        let missing =
            QuerySpec::new().filter(Condition::compare("_id", Operator::Exists, json!(false)));
        assert_snapshot!(
            sparql(&compile(&missing)?),
            @r#"SELECT ?_id WHERE { ?_root <rdf:type> <c:BlogPost> . BIND(?_root AS ?_id) FILTER("false"^^<xsd:boolean>) }"#
        );
        Ok(())
    }

    #[test]
    fn slice_and_distinct() -> OdmResult<()> {
        let spec = QuerySpec::new()
            .field("title", "title")
            .distinct(true)
            .limit(10)
            .offset(5);
        assert_snapshot!(
            sparql(&compile(&spec)?),
            @"SELECT DISTINCT ?title WHERE { ?_root <rdf:type> <c:BlogPost> .?_root <p:BlogPost/title> ?_p.title . BIND(?_p.title AS ?title) } OFFSET 5 LIMIT 10"
        );
        Ok(())
    }
}
