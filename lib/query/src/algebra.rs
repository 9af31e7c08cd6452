//! The algebra tree built by the query compiler.
//!
//! A [SelectAlgebra] keeps the pattern lists apart (required, filter, optional, bind) so that
//! tests and callers can inspect what a query asks for. [SelectAlgebra::to_query] lowers it into a
//! [spargebra::Query], whose `Display` implementation renders the SPARQL text.
//!
//! A grouped query matches the documents once. Every aggregate that reaches beyond the document
//! itself is reduced in a subquery of its own, over the distinct documents of each group, and the
//! subqueries are joined on the group keys. This way two multi-valued columns never multiply each
//! other's solutions.

use rdf_odm_encoding::packing::ArrayPacking;
use rdf_odm_encoding::variables::root_variable;
use rdf_odm_model::{Literal, NamedNode, Variable};
use spargebra::algebra::{
    AggregateExpression, AggregateFunction, Expression, Function, GraphPattern, OrderExpression,
    PropertyPathExpression,
};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use spargebra::Query;

/// One element of a group graph pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatternElement {
    Triple(TriplePattern),
    /// A property path, used for the `^predicate` hops of inverse relations.
    Path {
        subject: TermPattern,
        path: PropertyPathExpression,
        object: TermPattern,
    },
    /// A `FILTER`. It constrains the whole group that contains it.
    Filter(Expression),
    Optional(Vec<PatternElement>),
    /// A `UNION` of alternative groups.
    Union(Vec<Vec<PatternElement>>),
    Bind {
        variable: Variable,
        expression: Expression,
    },
}

impl PatternElement {
    pub fn triple(
        subject: impl Into<TermPattern>,
        predicate: impl Into<NamedNodePattern>,
        object: impl Into<TermPattern>,
    ) -> Self {
        Self::Triple(TriplePattern {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        })
    }

    /// `subject ^predicate object`, i.e. `object predicate subject`.
    pub fn inverse_path(
        subject: impl Into<TermPattern>,
        predicate: NamedNode,
        object: impl Into<TermPattern>,
    ) -> Self {
        Self::Path {
            subject: subject.into(),
            path: PropertyPathExpression::Reverse(Box::new(PropertyPathExpression::NamedNode(
                predicate,
            ))),
            object: object.into(),
        }
    }

    pub fn bind(variable: Variable, expression: Expression) -> Self {
        Self::Bind {
            variable,
            expression,
        }
    }
}

/// One column of the `SELECT` clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// A variable bound in the `WHERE` clause.
    Variable(Variable),
    /// `(aggregate AS ?variable)`.
    ///
    /// Without `values`, the aggregate reduces the matching documents of each group. With `values`,
    /// it reduces the solutions of these patterns, matched from each document of the group.
    Aggregate {
        variable: Variable,
        aggregate: AggregateExpression,
        values: Option<Vec<PatternElement>>,
    },
    /// An array column: the distinct values of `encoded`, bound by `values`, are concatenated into
    /// `packed` and then wrapped into `variable` according to `packing`.
    Packed {
        variable: Variable,
        packed: Variable,
        encoded: Variable,
        packing: ArrayPacking,
        values: Vec<PatternElement>,
    },
}

impl Projection {
    /// The variable that carries the column in the results.
    pub fn variable(&self) -> &Variable {
        match self {
            Self::Variable(variable)
            | Self::Aggregate { variable, .. }
            | Self::Packed { variable, .. } => variable,
        }
    }

    pub fn is_aggregated(&self) -> bool {
        !matches!(self, Self::Variable(_))
    }
}

/// A `SELECT` query over the documents of one model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectAlgebra {
    pub projection: Vec<Projection>,
    pub required: Vec<PatternElement>,
    pub filters: Vec<PatternElement>,
    pub optionals: Vec<PatternElement>,
    pub bindings: Vec<PatternElement>,
    /// Empty if the query does not group.
    pub group_by: Vec<Variable>,
    pub order_by: Vec<OrderExpression>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub distinct: bool,
    /// The named graph that scopes the `WHERE` clause.
    pub graph: Option<NamedNode>,
}

impl SelectAlgebra {
    /// Returns true if the query has a `GROUP BY` clause.
    pub fn is_grouped(&self) -> bool {
        self.projection.iter().any(Projection::is_aggregated)
    }

    /// All elements of the `WHERE` clause in the order required, filter, optional, bind.
    pub fn where_elements(&self) -> impl Iterator<Item = &PatternElement> {
        self.required
            .iter()
            .chain(&self.filters)
            .chain(&self.optionals)
            .chain(&self.bindings)
    }

    /// Lowers the algebra into a `spargebra` query.
    pub fn to_query(&self) -> Query {
        let elements = self.where_elements().cloned().collect::<Vec<_>>();
        let mut pattern = self.scoped(group_pattern(&elements));
        if self.is_grouped() {
            pattern = self.group(&pattern);
        }
        if !self.order_by.is_empty() {
            pattern = GraphPattern::OrderBy {
                inner: Box::new(pattern),
                expression: self.order_by.clone(),
            };
        }
        pattern = GraphPattern::Project {
            inner: Box::new(pattern),
            variables: self
                .projection
                .iter()
                .map(|projection| projection.variable().clone())
                .collect(),
        };
        if self.distinct {
            pattern = GraphPattern::Distinct {
                inner: Box::new(pattern),
            };
        }
        if self.offset > 0 || self.limit.is_some() {
            pattern = GraphPattern::Slice {
                inner: Box::new(pattern),
                start: self.offset,
                length: self.limit,
            };
        }

        Query::Select {
            dataset: None,
            pattern,
            base_iri: None,
        }
    }

    /// Wraps `pattern` into the named graph of the query, if there is one.
    fn scoped(&self, pattern: GraphPattern) -> GraphPattern {
        match &self.graph {
            Some(graph) => GraphPattern::Graph {
                name: NamedNodePattern::NamedNode(graph.clone()),
                inner: Box::new(pattern),
            },
            None => pattern,
        }
    }

    fn group(&self, documents: &GraphPattern) -> GraphPattern {
        let mut aggregates = Vec::new();
        let mut columns = Vec::new();
        let mut wrappings = Vec::new();
        for projection in &self.projection {
            match projection {
                Projection::Variable(_) => {}
                Projection::Aggregate {
                    variable,
                    aggregate,
                    values: None,
                } => aggregates.push((variable.clone(), aggregate.clone())),
                Projection::Aggregate {
                    variable,
                    aggregate,
                    values: Some(values),
                } => columns.push((variable.clone(), aggregate.clone(), values.as_slice())),
                Projection::Packed {
                    variable,
                    packed,
                    encoded,
                    packing,
                    values,
                } => {
                    columns.push((
                        packed.clone(),
                        AggregateExpression::FunctionCall {
                            name: AggregateFunction::GroupConcat {
                                separator: Some(packing.separator().to_owned()),
                            },
                            expr: Expression::Variable(encoded.clone()),
                            distinct: true,
                        },
                        values.as_slice(),
                    ));
                    wrappings.push((variable.clone(), packed.clone(), *packing));
                }
            }
        }

        // Without keys and document aggregates, the columns alone yield the single group.
        let mut pattern = if aggregates.is_empty() && self.group_by.is_empty() {
            empty()
        } else {
            GraphPattern::Group {
                inner: Box::new(documents.clone()),
                variables: self.group_by.clone(),
                aggregates,
            }
        };
        for (variable, aggregate, values) in columns {
            pattern = join(pattern, self.column(documents, variable, aggregate, values));
        }
        for (variable, packed, packing) in wrappings {
            pattern = GraphPattern::Extend {
                inner: Box::new(pattern),
                variable,
                expression: Expression::FunctionCall(
                    Function::Concat,
                    vec![
                        string(packing.open()),
                        Expression::Variable(packed),
                        string(packing.close()),
                    ],
                ),
            };
        }
        pattern
    }

    /// Reduces the solutions of `values` into `variable`, one row per group.
    ///
    /// The documents are first made distinct per group. `values` is matched optionally, so a group
    /// whose documents have no values still gets a row.
    fn column(
        &self,
        documents: &GraphPattern,
        variable: Variable,
        aggregate: AggregateExpression,
        values: &[PatternElement],
    ) -> GraphPattern {
        let mut keys = self.group_by.clone();
        keys.push(root_variable());
        let mut inner = GraphPattern::Distinct {
            inner: Box::new(GraphPattern::Project {
                inner: Box::new(documents.clone()),
                variables: keys,
            }),
        };
        if !values.is_empty() {
            inner = GraphPattern::LeftJoin {
                left: Box::new(inner),
                right: Box::new(self.scoped(group_pattern(values))),
                expression: None,
            };
        }
        GraphPattern::Group {
            inner: Box::new(inner),
            variables: self.group_by.clone(),
            aggregates: vec![(variable, aggregate)],
        }
    }
}

/// Lowers the elements of one group into a graph pattern.
///
/// Consecutive triples are merged into one basic graph pattern. The filters of the group are
/// applied on top of everything else.
pub fn group_pattern(elements: &[PatternElement]) -> GraphPattern {
    let mut pattern = empty();
    let mut triples = Vec::new();
    let mut filters = Vec::new();

    for element in elements {
        if let PatternElement::Triple(triple) = element {
            triples.push(triple.clone());
            continue;
        }
        pattern = join(pattern, flush(&mut triples));

        match element {
            PatternElement::Triple(_) => {}
            PatternElement::Path {
                subject,
                path,
                object,
            } => {
                pattern = join(
                    pattern,
                    GraphPattern::Path {
                        subject: subject.clone(),
                        path: path.clone(),
                        object: object.clone(),
                    },
                );
            }
            PatternElement::Filter(expression) => filters.push(expression.clone()),
            PatternElement::Optional(inner) => {
                pattern = GraphPattern::LeftJoin {
                    left: Box::new(pattern),
                    right: Box::new(group_pattern(inner)),
                    expression: None,
                };
            }
            PatternElement::Union(branches) => {
                let union = branches
                    .iter()
                    .map(|branch| group_pattern(branch))
                    .reduce(|left, right| GraphPattern::Union {
                        left: Box::new(left),
                        right: Box::new(right),
                    });
                // An empty union has no solutions.
                let union = union.unwrap_or_else(|| GraphPattern::Filter {
                    expr: Expression::Literal(Literal::from(false)),
                    inner: Box::new(empty()),
                });
                pattern = join(pattern, union);
            }
            PatternElement::Bind {
                variable,
                expression,
            } => {
                pattern = GraphPattern::Extend {
                    inner: Box::new(pattern),
                    variable: variable.clone(),
                    expression: expression.clone(),
                };
            }
        }
    }
    pattern = join(pattern, flush(&mut triples));

    match conjunction(filters) {
        Some(expr) => GraphPattern::Filter {
            expr,
            inner: Box::new(pattern),
        },
        None => pattern,
    }
}

/// Combines expressions with `&&`. Returns `None` for no expressions.
pub fn conjunction(expressions: impl IntoIterator<Item = Expression>) -> Option<Expression> {
    expressions
        .into_iter()
        .reduce(|left, right| Expression::And(Box::new(left), Box::new(right)))
}

/// A plain string literal expression.
pub fn string(value: &str) -> Expression {
    Expression::Literal(Literal::new_simple_literal(value))
}

fn empty() -> GraphPattern {
    GraphPattern::Bgp {
        patterns: Vec::new(),
    }
}

fn is_empty(pattern: &GraphPattern) -> bool {
    matches!(pattern, GraphPattern::Bgp { patterns } if patterns.is_empty())
}

fn flush(triples: &mut Vec<TriplePattern>) -> GraphPattern {
    GraphPattern::Bgp {
        patterns: std::mem::take(triples),
    }
}

fn join(left: GraphPattern, right: GraphPattern) -> GraphPattern {
    if is_empty(&right) {
        return left;
    }
    if is_empty(&left) {
        return right;
    }
    match (left, right) {
        (GraphPattern::Bgp { patterns: mut left }, GraphPattern::Bgp { patterns: right }) => {
            left.extend(right);
            GraphPattern::Bgp { patterns: left }
        }
        (left, right) => GraphPattern::Join {
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdf_odm_model::vocab::rdf;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn node(iri: &str) -> NamedNode {
        NamedNode::new_unchecked(iri)
    }

    #[test]
    fn consecutive_triples_form_one_bgp() {
        let pattern = group_pattern(&[
            PatternElement::triple(var("s"), rdf::TYPE.into_owned(), node("http://e/C")),
            PatternElement::triple(var("s"), node("http://e/p"), var("o")),
        ]);
        assert!(matches!(pattern, GraphPattern::Bgp { patterns } if patterns.len() == 2));
    }

    #[test]
    fn filters_wrap_their_group() {
        let pattern = group_pattern(&[
            PatternElement::Filter(Expression::Bound(var("o"))),
            PatternElement::triple(var("s"), node("http://e/p"), var("o")),
            PatternElement::Optional(vec![PatternElement::triple(
                var("s"),
                node("http://e/q"),
                var("q"),
            )]),
        ]);
        let GraphPattern::Filter { inner, .. } = pattern else {
            panic!("the filter must be outermost");
        };
        assert!(matches!(*inner, GraphPattern::LeftJoin { .. }));
    }

    fn grouped_algebra() -> SelectAlgebra {
        SelectAlgebra {
            projection: vec![
                Projection::Variable(var("sex")),
                Projection::Aggregate {
                    variable: var("total"),
                    aggregate: AggregateExpression::CountSolutions { distinct: true },
                    values: None,
                },
                Projection::Aggregate {
                    variable: var("views"),
                    aggregate: AggregateExpression::FunctionCall {
                        name: AggregateFunction::Sum,
                        expr: Expression::Variable(var("v")),
                        distinct: false,
                    },
                    values: Some(vec![
                        PatternElement::inverse_path(var("_root"), node("http://e/author"), var("post")),
                        PatternElement::triple(var("post"), node("http://e/views"), var("v")),
                    ]),
                },
                Projection::Packed {
                    variable: var("tags"),
                    packed: var("_g\u{b7}tags"),
                    encoded: var("_e\u{b7}tags"),
                    packing: ArrayPacking::Values,
                    values: vec![
                        PatternElement::triple(var("_root"), node("http://e/tag"), var("tag")),
                        PatternElement::bind(
                            var("_e\u{b7}tags"),
                            Expression::FunctionCall(
                                Function::EncodeForUri,
                                vec![Expression::FunctionCall(
                                    Function::Str,
                                    vec![Expression::Variable(var("tag"))],
                                )],
                            ),
                        ),
                    ],
                },
            ],
            required: vec![
                PatternElement::triple(var("_root"), rdf::TYPE.into_owned(), node("http://e/User")),
                PatternElement::triple(var("_root"), node("http://e/gender"), var("_p\u{b7}gender")),
            ],
            bindings: vec![PatternElement::bind(
                var("sex"),
                Expression::Variable(var("_p\u{b7}gender")),
            )],
            group_by: vec![var("sex")],
            order_by: vec![OrderExpression::Desc(Expression::Variable(var("total")))],
            limit: Some(10),
            offset: 5,
            distinct: true,
            graph: Some(node("http://e/graph")),
            ..SelectAlgebra::default()
        }
    }

    #[test]
    fn grouped_query_renders_valid_sparql() -> Result<(), Box<dyn std::error::Error>> {
        let algebra = grouped_algebra();
        assert!(algebra.is_grouped());

        let text = algebra.to_query().to_string();
        Query::parse(&text, None)?;
        assert!(text.contains("GROUP BY"), "{text}");
        assert!(text.contains("GROUP_CONCAT"), "{text}");
        assert!(text.contains("<http://e/graph>"), "{text}");
        Ok(())
    }

    #[test]
    fn every_value_column_is_reduced_in_its_own_subquery() {
        fn groups(pattern: &GraphPattern, found: &mut Vec<usize>) {
            match pattern {
                GraphPattern::Group {
                    inner, aggregates, ..
                } => {
                    found.push(aggregates.len());
                    groups(inner, found);
                }
                GraphPattern::Join { left, right } | GraphPattern::LeftJoin { left, right, .. } => {
                    groups(left, found);
                    groups(right, found);
                }
                GraphPattern::Extend { inner, .. }
                | GraphPattern::OrderBy { inner, .. }
                | GraphPattern::Project { inner, .. }
                | GraphPattern::Distinct { inner }
                | GraphPattern::Slice { inner, .. }
                | GraphPattern::Filter { inner, .. }
                | GraphPattern::Graph { inner, .. } => groups(inner, found),
                _ => {}
            }
        }

        let Query::Select { pattern, .. } = grouped_algebra().to_query() else {
            panic!("expected a select query");
        };
        let mut found = Vec::new();
        groups(&pattern, &mut found);
        // The document count, the view sum and the tag list.
        assert_eq!(found, vec![1, 1, 1]);

        let text = pattern.to_string();
        assert_eq!(text.matches("SELECT DISTINCT ?sex ?_root").count(), 2, "{text}");
    }
}
