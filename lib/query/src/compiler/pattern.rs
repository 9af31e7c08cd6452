use crate::algebra::PatternElement;
use rdf_odm_encoding::variables::{root_variable, variable, VariableRole};
use rdf_odm_encoding::ValueCodec;
use rdf_odm_model::vocab::rdf;
use rdf_odm_model::{OdmResult, Term};
use rdf_odm_schema::{PathStep, StepTarget};
use spargebra::algebra::Expression;
use spargebra::term::TermPattern;

/// Emits the patterns that lead from `subject` over `step` to `object`.
///
/// An inverse hop is a `^predicate` path plus a type check on `object`, as the origin predicate
/// alone does not tell which model the referencing entity belongs to. `_id` steps emit nothing,
/// the identity of an entity is the entity itself.
pub(crate) fn hop(
    codec: ValueCodec<'_>,
    subject: TermPattern,
    step: &PathStep<'_>,
    object: TermPattern,
) -> OdmResult<Vec<PatternElement>> {
    let property = match step.target {
        StepTarget::Identity => return Ok(Vec::new()),
        StepTarget::Type => {
            return Ok(vec![PatternElement::triple(
                subject,
                rdf::TYPE.into_owned(),
                object,
            )])
        }
        StepTarget::Property(property) => property,
    };

    match property.inverse_origin() {
        None => Ok(vec![PatternElement::triple(
            subject,
            property.predicate().clone(),
            object,
        )]),
        Some((origin, _)) => Ok(vec![
            PatternElement::inverse_path(subject, property.predicate().clone(), object.clone()),
            PatternElement::triple(object, rdf::TYPE.into_owned(), codec.class_uri(origin)?),
        ]),
    }
}

/// A chain of hops from the root document to the end of a path.
pub(crate) struct Chain {
    pub elements: Vec<PatternElement>,
    /// The term reached at the end of the chain.
    pub terminal: TermPattern,
}

/// Emits the hops along `steps`, starting at the root document.
///
/// Intermediate nodes are variables with `role`, named after `segments`. If `constant` is given,
/// it replaces the last node, which turns the chain into an equality test. A trailing `_id` step
/// addresses the node before it.
pub(crate) fn chain(
    codec: ValueCodec<'_>,
    steps: &[PathStep<'_>],
    segments: &[String],
    role: VariableRole,
    constant: Option<Term>,
) -> OdmResult<Chain> {
    let hops = match steps.split_last() {
        Some((last, rest)) if last.target == StepTarget::Identity => rest,
        _ => steps,
    };

    let mut elements = Vec::new();
    let mut subject = TermPattern::Variable(root_variable());
    if hops.is_empty() {
        if let Some(constant) = constant {
            elements.push(PatternElement::Filter(Expression::Equal(
                Box::new(Expression::Variable(root_variable())),
                Box::new(term_expression(constant.clone())),
            )));
            subject = term_pattern(constant);
        }
        return Ok(Chain {
            elements,
            terminal: subject,
        });
    }

    let last = hops.len() - 1;
    for (idx, step) in hops.iter().enumerate() {
        let object = match &constant {
            Some(constant) if idx == last => term_pattern(constant.clone()),
            _ => TermPattern::Variable(variable(role, &segments[..=idx])?),
        };
        elements.extend(hop(codec, subject, step, object.clone())?);
        subject = object;
    }
    Ok(Chain {
        elements,
        terminal: subject,
    })
}

pub(crate) fn term_pattern(term: Term) -> TermPattern {
    match term {
        Term::NamedNode(node) => TermPattern::NamedNode(node),
        Term::BlankNode(node) => TermPattern::BlankNode(node),
        Term::Literal(literal) => TermPattern::Literal(literal),
    }
}

pub(crate) fn term_expression(term: Term) -> Expression {
    match term {
        Term::NamedNode(node) => Expression::NamedNode(node),
        Term::BlankNode(node) => Expression::Literal(node.as_str().into()),
        Term::Literal(literal) => Expression::Literal(literal),
    }
}

/// The expression form of a term pattern that holds no blank node.
pub(crate) fn pattern_expression(pattern: &TermPattern) -> Expression {
    match pattern {
        TermPattern::NamedNode(node) => Expression::NamedNode(node.clone()),
        TermPattern::Literal(literal) => Expression::Literal(literal.clone()),
        TermPattern::Variable(variable) => Expression::Variable(variable.clone()),
        TermPattern::BlankNode(node) => Expression::Literal(node.as_str().into()),
    }
}
