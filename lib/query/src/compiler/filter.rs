//! Compiles filter conditions.
//!
//! Each comparison gets its own private variables (`_filterN`), so filters can never collide with
//! the projection or with each other.
//!
//! - `$eq` on a path that is not projected is inlined as a chain ending in the constant.
//! - `$all` is inlined as one chain per value that shares all but the last hop.
//! - Every other positive operator becomes `FILTER EXISTS { chain FILTER(test) }`.
//! - Negative operators become the `FILTER NOT EXISTS` of their positive inverse.

use crate::algebra::{group_pattern, string, PatternElement};
use crate::compiler::pattern::{chain, hop, pattern_expression, term_expression, term_pattern};
use crate::compiler::FullTextSearch;
use crate::condition::{Condition, Operator, Polarity};
use rdf_odm_encoding::variables::{root_variable, VariableRole};
use rdf_odm_encoding::ValueCodec;
use rdf_odm_model::vocab::rdf;
use rdf_odm_model::{Literal, OdmError, OdmResult, Term};
use rdf_odm_schema::{PathStep, PropertyPath, StepTarget};
use serde_json::Value;
use spargebra::algebra::{Expression, Function};
use std::collections::HashSet;

pub(crate) struct FilterCompiler<'a, 'schema> {
    codec: ValueCodec<'schema>,
    model: &'a str,
    projected: &'a HashSet<PropertyPath>,
    full_text: &'a FullTextSearch,
    next_filter: usize,
}

impl<'a, 'schema> FilterCompiler<'a, 'schema> {
    pub fn new(
        codec: ValueCodec<'schema>,
        model: &'a str,
        projected: &'a HashSet<PropertyPath>,
        full_text: &'a FullTextSearch,
    ) -> Self {
        Self {
            codec,
            model,
            projected,
            full_text,
            next_filter: 0,
        }
    }

    /// Compiles `condition` into patterns that constrain the root document.
    pub fn compile(&mut self, condition: &Condition) -> OdmResult<Vec<PatternElement>> {
        match condition {
            Condition::Compare {
                path,
                operator,
                operand,
            } => self.compile_comparison(path, *operator, operand),
            Condition::And(children) => {
                let mut elements = Vec::new();
                for child in children {
                    elements.extend(self.compile(child)?);
                }
                Ok(elements)
            }
            Condition::Or(children) => {
                let anchor = self.anchor()?;
                let branches = children
                    .iter()
                    .map(|child| {
                        let mut branch = vec![anchor.clone()];
                        branch.extend(self.compile(child)?);
                        Ok(branch)
                    })
                    .collect::<OdmResult<Vec<_>>>()?;
                Ok(vec![PatternElement::Union(branches)])
            }
            Condition::Not(child) => self.compile(&child.as_ref().clone().negate()),
        }
    }

    /// Binds the root document inside a `UNION` branch, so the filters of the branch refer to it.
    fn anchor(&self) -> OdmResult<PatternElement> {
        Ok(PatternElement::triple(
            root_variable(),
            rdf::TYPE.into_owned(),
            self.codec.class_uri(self.model)?,
        ))
    }

    fn compile_comparison(
        &mut self,
        path: &PropertyPath,
        operator: Operator,
        operand: &Value,
    ) -> OdmResult<Vec<PatternElement>> {
        let resolved = self.codec.resolver().resolve_path(self.model, path)?;
        let role = VariableRole::Filter(self.next_filter);
        self.next_filter += 1;
        tracing::trace!("Compiling filter {path} {operator} {operand}");

        let steps = resolved.steps();
        let segments = path.segments();
        let positive = operator.positive();
        let negated = operator.polarity() == Polarity::Negative;

        let elements = match positive {
            Operator::Eq if !negated && (path.is_identity() || !self.projected.contains(path)) => {
                let value = self.encode(path, operand)?;
                return Ok(chain(self.codec, steps, segments, role, Some(value))?.elements);
            }
            Operator::All => {
                let values = self.encode_list(path, operand)?;
                let elements = self.all(steps, segments, role, values)?;
                if !negated {
                    return Ok(elements);
                }
                elements
            }
            Operator::Exists => {
                let elements = chain(self.codec, steps, segments, role, None)?.elements;
                // The document itself always exists.
                if elements.is_empty() {
                    return Ok(if negated {
                        vec![PatternElement::Filter(Expression::Literal(Literal::from(false)))]
                    } else {
                        Vec::new()
                    });
                }
                elements
            }
            Operator::Search => {
                let text = operand.as_str().ok_or_else(|| invalid(path, "expected a string"))?;
                let chain = chain(self.codec, steps, segments, role, None)?;
                let mut elements = chain.elements;
                elements.push(PatternElement::triple(
                    chain.terminal.clone(),
                    self.full_text.search.clone(),
                    Literal::new_simple_literal(text),
                ));
                elements.push(PatternElement::triple(
                    chain.terminal,
                    self.full_text.match_all_terms.clone(),
                    Literal::new_simple_literal("true"),
                ));
                elements
            }
            _ => {
                let chain = chain(self.codec, steps, segments, role, None)?;
                let value = pattern_expression(&chain.terminal);
                let mut elements = chain.elements;
                elements.push(PatternElement::Filter(
                    self.test(path, positive, value, operand)?,
                ));
                elements
            }
        };

        let exists = Expression::Exists(Box::new(group_pattern(&elements)));
        Ok(vec![PatternElement::Filter(if negated {
            Expression::Not(Box::new(exists))
        } else {
            exists
        })])
    }

    /// One chain per value, sharing every hop but the last.
    fn all(
        &self,
        steps: &[PathStep<'_>],
        segments: &[String],
        role: VariableRole,
        values: Vec<Term>,
    ) -> OdmResult<Vec<PatternElement>> {
        let hops = match steps.split_last() {
            Some((last, rest)) if last.target == StepTarget::Identity => rest,
            _ => steps,
        };
        let Some((last, parents)) = hops.split_last() else {
            return Ok(values
                .into_iter()
                .map(|value| {
                    PatternElement::Filter(Expression::Equal(
                        Box::new(Expression::Variable(
                            root_variable(),
                        )),
                        Box::new(term_expression(value)),
                    ))
                })
                .collect());
        };

        let parent = chain(self.codec, parents, segments, role, None)?;
        let mut elements = parent.elements;
        for value in values {
            elements.extend(hop(
                self.codec,
                parent.terminal.clone(),
                last,
                term_pattern(value),
            )?);
        }
        Ok(elements)
    }

    /// The test that a value must pass for a positive operator.
    fn test(
        &self,
        path: &PropertyPath,
        operator: Operator,
        value: Expression,
        operand: &Value,
    ) -> OdmResult<Expression> {
        let constant = || -> OdmResult<Box<Expression>> {
            Ok(Box::new(term_expression(self.encode(path, operand)?)))
        };
        Ok(match operator {
            Operator::Eq => Expression::Equal(Box::new(value), constant()?),
            Operator::Gt => Expression::Greater(Box::new(value), constant()?),
            Operator::Gte => Expression::GreaterOrEqual(Box::new(value), constant()?),
            Operator::Lt => Expression::Less(Box::new(value), constant()?),
            Operator::Lte => Expression::LessOrEqual(Box::new(value), constant()?),
            Operator::In => Expression::In(
                Box::new(value),
                self.encode_list(path, operand)?
                    .into_iter()
                    .map(term_expression)
                    .collect(),
            ),
            Operator::Regex | Operator::IRegex => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| invalid(path, "a regular expression must be a string"))?;
                let mut args = vec![str(value), string(pattern)];
                if operator == Operator::IRegex {
                    args.push(string("i"));
                }
                Expression::FunctionCall(Function::Regex, args)
            }
            Operator::StrLen => {
                let length = operand
                    .as_i64()
                    .ok_or_else(|| invalid(path, "a string length must be an integer"))?;
                Expression::Equal(
                    Box::new(Expression::FunctionCall(Function::StrLen, vec![str(value)])),
                    Box::new(Expression::Literal(Literal::from(length))),
                )
            }
            Operator::Ne
            | Operator::Nin
            | Operator::NotRegex
            | Operator::NotIRegex
            | Operator::NotStrLen
            | Operator::Exists
            | Operator::NotExists
            | Operator::All
            | Operator::NotAll
            | Operator::Search
            | Operator::NotSearch => {
                return OdmError::invalid_query(format!("'{operator}' has no value test"))
            }
        })
    }

    fn encode(&self, path: &PropertyPath, operand: &Value) -> OdmResult<Term> {
        self.codec.encode_value(self.model, path, operand)
    }

    /// Encodes a list operand. A single value is treated as a list of one.
    fn encode_list(&self, path: &PropertyPath, operand: &Value) -> OdmResult<Vec<Term>> {
        match operand {
            Value::Array(values) => values.iter().map(|value| self.encode(path, value)).collect(),
            value => Ok(vec![self.encode(path, value)?]),
        }
    }
}

/// `STR(value)`
fn str(value: Expression) -> Expression {
    Expression::FunctionCall(Function::Str, vec![value])
}

fn invalid(path: &PropertyPath, reason: &str) -> OdmError {
    OdmError::InvalidValue {
        path: path.to_string(),
        reason: reason.to_owned(),
    }
}
