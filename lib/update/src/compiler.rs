use rdf_odm_encoding::ValueCodec;
use rdf_odm_model::vocab::rdf;
use rdf_odm_model::{
    Document, DocumentIdentity, NamedNode, OdmError, OdmResult, Term, Variable, ID_FIELD,
    TYPE_FIELD,
};
use rdf_odm_schema::{PropertyPath, PropertyResolver};
use serde_json::Value;
use spargebra::algebra::GraphPattern;
use spargebra::term::{
    GraphName, GraphNamePattern, GroundQuadPattern, GroundTermPattern, NamedNodePattern, Quad,
    QuadPattern, TermPattern, TriplePattern,
};
use spargebra::{GraphUpdateOperation, Update};

/// Compiles documents into `INSERT DATA` and `DELETE/INSERT` updates.
///
/// Documents are whole entities. A document that is replaced loses every property it does not
/// carry anymore.
#[derive(Clone, Copy)]
pub struct UpdateCompiler<'schema> {
    codec: ValueCodec<'schema>,
    graph: Option<&'schema NamedNode>,
}

impl<'schema> UpdateCompiler<'schema> {
    /// Creates a compiler whose updates are scoped to `graph`, or to the default graph.
    pub fn new(resolver: &'schema dyn PropertyResolver, graph: Option<&'schema NamedNode>) -> Self {
        Self {
            codec: ValueCodec::new(resolver),
            graph,
        }
    }

    /// Inserts a new document.
    ///
    /// Nothing is deleted, so saving an existing document adds to its values.
    pub fn build_save(&self, document: &Document) -> OdmResult<Update> {
        let identity = DocumentIdentity::of(document)?;
        let data = self
            .statements(identity, document)?
            .into_iter()
            .map(|(subject, predicate, object)| Quad {
                subject: subject.into(),
                predicate,
                object,
                graph_name: self.graph_name(),
            })
            .collect();

        let update = update(GraphUpdateOperation::InsertData { data });
        tracing::debug!("Compiled save of {} '{}': {update}", identity.model, identity.id);
        Ok(update)
    }

    /// Replaces every statement about a document with its new statements in one operation.
    pub fn build_replace(&self, document: &Document) -> OdmResult<Update> {
        let identity = DocumentIdentity::of(document)?;
        let subject = self.codec.instance_uri(identity.model, identity.id)?;
        let insert = self
            .statements(identity, document)?
            .into_iter()
            .map(|(subject, predicate, object)| QuadPattern {
                subject: subject.into(),
                predicate: predicate.into(),
                object: term_pattern(object),
                graph_name: self.graph_name_pattern(),
            })
            .collect();

        // The wildcard is optional so that the insert also runs for a new document.
        let pattern = GraphPattern::LeftJoin {
            left: Box::new(GraphPattern::Bgp {
                patterns: Vec::new(),
            }),
            right: Box::new(GraphPattern::Bgp {
                patterns: vec![wildcard_pattern(&subject)],
            }),
            expression: None,
        };
        let update = update(GraphUpdateOperation::DeleteInsert {
            delete: vec![self.wildcard(&subject)],
            insert,
            using: None,
            pattern: Box::new(self.scoped(pattern)),
        });
        tracing::debug!("Compiled replace of {} '{}': {update}", identity.model, identity.id);
        Ok(update)
    }

    /// Deletes every statement about a document.
    pub fn build_delete(&self, document: &Document) -> OdmResult<Update> {
        let identity = DocumentIdentity::of(document)?;
        let subject = self.codec.instance_uri(identity.model, identity.id)?;
        let pattern = GraphPattern::Bgp {
            patterns: vec![wildcard_pattern(&subject)],
        };
        let update = update(GraphUpdateOperation::DeleteInsert {
            delete: vec![self.wildcard(&subject)],
            insert: Vec::new(),
            using: None,
            pattern: Box::new(self.scoped(pattern)),
        });
        tracing::debug!("Compiled delete of {} '{}': {update}", identity.model, identity.id);
        Ok(update)
    }

    /// The statements that describe `document`, including its `rdf:type`.
    ///
    /// Inverse relations are stored on the other side and are skipped. Arrays yield one statement
    /// per element, `null` yields none.
    fn statements(
        &self,
        identity: DocumentIdentity<'_>,
        document: &Document,
    ) -> OdmResult<Vec<(NamedNode, NamedNode, Term)>> {
        let model = identity.model;
        let subject = self.codec.instance_uri(model, identity.id)?;
        let mut statements = vec![(
            subject.clone(),
            rdf::TYPE.into_owned(),
            self.codec.class_uri(model)?.into(),
        )];

        for (key, value) in document {
            if key == ID_FIELD || key == TYPE_FIELD {
                continue;
            }
            let property = self.codec.resolver().property(model, key)?;
            if property.is_inverse() {
                tracing::trace!("Skipping inverse relation {model}.{key}");
                continue;
            }

            let elements = match value {
                Value::Null => continue,
                Value::Array(elements) if property.is_array() => elements.as_slice(),
                Value::Array(_) => {
                    return OdmError::invalid_value(key.as_str(), "the property is not an array")
                }
                value => std::slice::from_ref(value),
            };
            let path = PropertyPath::from(key.as_str());
            for element in elements.iter().filter(|element| !element.is_null()) {
                let object = self.codec.encode_value(model, &path, element)?;
                tracing::trace!("Statement {model}.{key} = {object}");
                statements.push((subject.clone(), property.predicate().clone(), object));
            }
        }
        Ok(statements)
    }

    /// `subject ?p ?o` in the target graph.
    fn wildcard(&self, subject: &NamedNode) -> GroundQuadPattern {
        GroundQuadPattern {
            subject: GroundTermPattern::NamedNode(subject.clone()),
            predicate: NamedNodePattern::Variable(predicate_variable()),
            object: GroundTermPattern::Variable(object_variable()),
            graph_name: self.graph_name_pattern(),
        }
    }

    fn scoped(&self, pattern: GraphPattern) -> GraphPattern {
        match self.graph {
            Some(graph) => GraphPattern::Graph {
                name: NamedNodePattern::NamedNode(graph.clone()),
                inner: Box::new(pattern),
            },
            None => pattern,
        }
    }

    fn graph_name(&self) -> GraphName {
        self.graph
            .map_or(GraphName::DefaultGraph, |graph| GraphName::NamedNode(graph.clone()))
    }

    fn graph_name_pattern(&self) -> GraphNamePattern {
        self.graph.map_or(GraphNamePattern::DefaultGraph, |graph| {
            GraphNamePattern::NamedNode(graph.clone())
        })
    }
}

fn update(operation: GraphUpdateOperation) -> Update {
    Update {
        base_iri: None,
        operations: vec![operation],
    }
}

fn wildcard_pattern(subject: &NamedNode) -> TriplePattern {
    TriplePattern {
        subject: subject.clone().into(),
        predicate: NamedNodePattern::Variable(predicate_variable()),
        object: TermPattern::Variable(object_variable()),
    }
}

fn predicate_variable() -> Variable {
    Variable::new_unchecked("p")
}

fn object_variable() -> Variable {
    Variable::new_unchecked("o")
}

fn term_pattern(term: Term) -> TermPattern {
    match term {
        Term::NamedNode(node) => TermPattern::NamedNode(node),
        Term::BlankNode(node) => TermPattern::BlankNode(node),
        Term::Literal(literal) => TermPattern::Literal(literal),
    }
}
