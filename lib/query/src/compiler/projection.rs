//! Flattens field selectors and aggregations into triple patterns, bindings and columns.
//!
//! Every scalar field path is split into its prefixes. Prefixes that a required field needs are
//! emitted once, in the required patterns. The other hops go into one `OPTIONAL` block per
//! `?`-marked group, so that missing values never eliminate a row.
//!
//! Array and aggregate columns do not touch the document patterns. Each of them carries the full
//! chain from the root document to its values, which the algebra reduces in a subquery of its own.

use crate::algebra::{string, PatternElement, Projection};
use crate::compiler::pattern::{hop, pattern_expression};
use crate::spec::{Aggregation, Aggregator, FieldPath, FieldSelector, QuerySpec};
use rdf_odm_encoding::packing::{object_member_prefix, ArrayPacking, OBJECT_SUFFIX};
use rdf_odm_encoding::variables::{output_variable, root_variable, variable, VariableRole};
use rdf_odm_encoding::ValueCodec;
use rdf_odm_model::{OdmResult, Variable};
use rdf_odm_schema::{PathStep, PropertyPath, ResolvedPath, StepTarget};
use spargebra::algebra::{AggregateExpression, AggregateFunction, Expression, Function};
use spargebra::term::TermPattern;
use std::collections::{BTreeMap, HashSet};

/// The patterns and columns of a projection.
#[derive(Default)]
pub(crate) struct CompiledProjection {
    pub required: Vec<PatternElement>,
    pub optionals: Vec<PatternElement>,
    pub bindings: Vec<PatternElement>,
    pub projection: Vec<Projection>,
    /// Paths whose values are projected. Equality filters on these paths cannot be inlined.
    pub projected: HashSet<PropertyPath>,
}

/// Where the hops of a projected path are emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Placement {
    Required,
    /// Segments from `from` on belong to the `OPTIONAL` block `group`.
    Optional { group: String, from: usize },
}

struct Target<'schema> {
    path: PropertyPath,
    resolved: ResolvedPath<'schema>,
    placement: Placement,
}

/// One `OPTIONAL` block under construction.
struct OptionalGroup {
    key: String,
    elements: Vec<PatternElement>,
    emitted: HashSet<PropertyPath>,
}

pub(crate) struct ProjectionCompiler<'a, 'schema> {
    codec: ValueCodec<'schema>,
    model: &'a str,
    required_paths: HashSet<PropertyPath>,
    emitted: HashSet<PropertyPath>,
    groups: Vec<OptionalGroup>,
    result: CompiledProjection,
}

impl<'a, 'schema> ProjectionCompiler<'a, 'schema> {
    pub fn new(codec: ValueCodec<'schema>, model: &'a str) -> Self {
        Self {
            codec,
            model,
            required_paths: HashSet::new(),
            emitted: HashSet::new(),
            groups: Vec::new(),
            result: CompiledProjection::default(),
        }
    }

    pub fn compile(mut self, spec: &QuerySpec) -> OdmResult<CompiledProjection> {
        let targets = self.collect_targets(spec)?;
        for target in &targets {
            let len = match &target.placement {
                Placement::Required => target.path.segments().len(),
                Placement::Optional { from, .. } => *from,
            };
            self.required_paths
                .extend((1..=len).map(|len| target.path.prefix(len)));
        }
        for target in &targets {
            tracing::trace!(
                "Projecting path '{}' ({:?})",
                target.path,
                target.placement
            );
            self.emit_required(target)?;
        }
        for target in &targets {
            self.emit_optional(target)?;
        }

        for (name, selector) in &spec.fields {
            self.project_field(name, selector)?;
        }
        for (name, aggregation) in &spec.aggregates {
            self.project_aggregate(name, aggregation)?;
        }

        self.result.optionals = self
            .groups
            .into_iter()
            .filter(|group| !group.elements.is_empty())
            .map(|group| PatternElement::Optional(group.elements))
            .collect();
        Ok(self.result)
    }

    fn collect_targets(&self, spec: &QuerySpec) -> OdmResult<Vec<Target<'schema>>> {
        let mut targets = Vec::new();
        for selector in spec.fields.values() {
            let FieldSelector::Scalar(path) = selector else {
                continue;
            };
            let placement = match (path.optional_group(), path.optional_from()) {
                (Some(group), Some(from)) => Placement::Optional { group, from },
                _ => Placement::Required,
            };
            targets.push(self.target(path.path().clone(), placement)?);
        }
        Ok(targets)
    }

    fn target(&self, path: PropertyPath, placement: Placement) -> OdmResult<Target<'schema>> {
        let resolved = self.codec.resolver().resolve_path(self.model, &path)?;
        Ok(Target {
            path,
            resolved,
            placement,
        })
    }

    /// Emits the hops of every required prefix of `target` that has not been emitted yet.
    fn emit_required(&mut self, target: &Target<'schema>) -> OdmResult<()> {
        for len in 1..=target.path.segments().len() {
            let prefix = target.path.prefix(len);
            if !self.required_paths.contains(&prefix) || self.emitted.contains(&prefix) {
                continue;
            }
            let elements = self.hop_to(target, len)?;
            self.result.required.extend(elements);
            self.emitted.insert(prefix);
        }
        Ok(())
    }

    /// Emits the remaining hops of `target` into its `OPTIONAL` block.
    fn emit_optional(&mut self, target: &Target<'schema>) -> OdmResult<()> {
        let key = match &target.placement {
            Placement::Required => return Ok(()),
            Placement::Optional { group, .. } => group.clone(),
        };
        let start = self.required_len(&target.path);
        let mut elements = Vec::new();
        let group_index = self.group_index(&key);
        for len in start + 1..=target.path.segments().len() {
            let prefix = target.path.prefix(len);
            if self.groups[group_index].emitted.insert(prefix) {
                elements.extend(self.hop_to(target, len)?);
            }
        }
        self.groups[group_index].elements.extend(elements);
        Ok(())
    }

    fn group_index(&mut self, key: &str) -> usize {
        if let Some(index) = self.groups.iter().position(|group| group.key == key) {
            return index;
        }
        self.groups.push(OptionalGroup {
            key: key.to_owned(),
            elements: Vec::new(),
            emitted: HashSet::new(),
        });
        self.groups.len() - 1
    }

    /// The number of leading segments of `path` that are emitted as required patterns.
    fn required_len(&self, path: &PropertyPath) -> usize {
        (1..=path.segments().len())
            .take_while(|len| self.required_paths.contains(&path.prefix(*len)))
            .count()
    }

    /// The hop from the prefix of length `len - 1` to the prefix of length `len`.
    fn hop_to(&self, target: &Target<'schema>, len: usize) -> OdmResult<Vec<PatternElement>> {
        let steps = target.resolved.steps();
        let step = &steps[len - 1];
        if is_root_type(&steps[..len]) {
            return Ok(Vec::new());
        }
        let subject = self.node(&target.resolved, &target.path, len - 1)?;
        let object = self.node(&target.resolved, &target.path, len)?;
        hop(self.codec, subject, step, object)
    }

    /// The term that holds the value of the prefix of length `len`.
    fn node(
        &self,
        resolved: &ResolvedPath<'schema>,
        path: &PropertyPath,
        len: usize,
    ) -> OdmResult<TermPattern> {
        let steps = &resolved.steps()[..len];
        match steps.last() {
            None => Ok(TermPattern::Variable(root_variable())),
            Some(step) if step.target == StepTarget::Identity => {
                self.node(resolved, path, len - 1)
            }
            Some(_) if is_root_type(steps) => Ok(TermPattern::NamedNode(
                resolved.root().class_uri().clone(),
            )),
            Some(_) => Ok(TermPattern::Variable(variable(
                VariableRole::Node,
                &path.segments()[..len],
            )?)),
        }
    }

    fn value_expression(&self, path: &PropertyPath) -> OdmResult<Expression> {
        let resolved = self.codec.resolver().resolve_path(self.model, path)?;
        Ok(pattern_expression(&self.node(
            &resolved,
            path,
            path.segments().len(),
        )?))
    }

    /// Every hop from the root document to the end of `path`.
    fn chain_from_root(&self, path: &PropertyPath) -> OdmResult<Vec<PatternElement>> {
        let target = self.target(path.clone(), Placement::Required)?;
        let mut elements = Vec::new();
        for len in 1..=path.segments().len() {
            elements.extend(self.hop_to(&target, len)?);
        }
        Ok(elements)
    }

    fn project_field(&mut self, name: &str, selector: &FieldSelector) -> OdmResult<()> {
        let output = output_variable(name)?;
        match selector {
            FieldSelector::Scalar(path) => {
                self.result.projected.insert(path.path().clone());
                let value = self.value_expression(path.path())?;
                let expression = if path.is_optional() {
                    Expression::Coalesce(vec![value, string("")])
                } else {
                    value
                };
                self.result
                    .bindings
                    .push(PatternElement::bind(output.clone(), expression));
                self.result.projection.push(Projection::Variable(output));
            }
            FieldSelector::Array(path) => self.project_values(name, output, path)?,
            FieldSelector::Objects { property, fields } => {
                self.project_objects(name, output, property.path(), fields)?;
            }
        }
        Ok(())
    }

    fn project_aggregate(&mut self, name: &str, aggregation: &Aggregation) -> OdmResult<()> {
        let output = output_variable(name)?;
        let Some(path) = &aggregation.property else {
            self.result.projection.push(Projection::Aggregate {
                variable: output,
                aggregate: AggregateExpression::FunctionCall {
                    name: AggregateFunction::Count,
                    expr: Expression::Variable(root_variable()),
                    distinct: true,
                },
                values: None,
            });
            return Ok(());
        };

        let function = match aggregation.aggregator {
            Aggregator::Count => AggregateFunction::Count,
            Aggregator::Sum => AggregateFunction::Sum,
            Aggregator::Avg => AggregateFunction::Avg,
            Aggregator::Min => AggregateFunction::Min,
            Aggregator::Max => AggregateFunction::Max,
            Aggregator::Array if aggregation.fields.is_empty() => {
                return self.project_values(name, output, &FieldPath::required(path.clone()));
            }
            Aggregator::Array | Aggregator::Object => {
                return self.project_objects(name, output, path, &aggregation.fields);
            }
        };
        self.result.projected.insert(path.clone());
        self.result.projection.push(Projection::Aggregate {
            variable: output,
            aggregate: AggregateExpression::FunctionCall {
                name: function,
                expr: self.value_expression(path)?,
                distinct: aggregation.distinct,
            },
            values: Some(self.chain_from_root(path)?),
        });
        Ok(())
    }

    /// Packs the distinct values of `path` into an array column.
    fn project_values(&mut self, name: &str, output: Variable, path: &FieldPath) -> OdmResult<()> {
        self.result.projected.insert(path.path().clone());
        let encoded = packed_variable(VariableRole::Encoded, name)?;
        let mut values = self.chain_from_root(path.path())?;
        values.push(PatternElement::bind(
            encoded.clone(),
            encode_for_uri(self.value_expression(path.path())?),
        ));
        self.result.projection.push(Projection::Packed {
            variable: output,
            packed: packed_variable(VariableRole::Packed, name)?,
            encoded,
            packing: ArrayPacking::Values,
            values,
        });
        Ok(())
    }

    /// Packs the related entities at `property` into an array of objects with `fields` as members.
    ///
    /// Each member is matched in its own `OPTIONAL` block, so a missing member only blanks that
    /// member.
    fn project_objects(
        &mut self,
        name: &str,
        output: Variable,
        property: &PropertyPath,
        fields: &BTreeMap<String, PropertyPath>,
    ) -> OdmResult<()> {
        self.result.projected.insert(property.clone());
        let mut values = self.chain_from_root(property)?;
        let mut members = Vec::with_capacity(fields.len() * 2 + 1);
        for (index, (member, relative)) in fields.iter().enumerate() {
            let path = property.join(relative);
            let target = self.target(path.clone(), Placement::Required)?;
            let mut elements = Vec::new();
            for len in property.segments().len() + 1..=path.segments().len() {
                elements.extend(self.hop_to(&target, len)?);
            }
            if !elements.is_empty() {
                values.push(PatternElement::Optional(elements));
            }

            members.push(string(&object_member_prefix(index, member)));
            members.push(Expression::Coalesce(vec![
                encode_for_uri(self.value_expression(&path)?),
                string(""),
            ]));
        }
        members.push(string(OBJECT_SUFFIX));

        let encoded = packed_variable(VariableRole::Encoded, name)?;
        values.push(PatternElement::bind(
            encoded.clone(),
            Expression::FunctionCall(Function::Concat, members),
        ));
        self.result.projection.push(Projection::Packed {
            variable: output,
            packed: packed_variable(VariableRole::Packed, name)?,
            encoded,
            packing: ArrayPacking::Objects,
            values,
        });
        Ok(())
    }
}

fn is_root_type(steps: &[PathStep<'_>]) -> bool {
    matches!(steps, [step] if step.target == StepTarget::Type)
}

fn packed_variable(role: VariableRole, name: &str) -> OdmResult<Variable> {
    variable(role, &name.split('.').collect::<Vec<_>>())
}

/// `ENCODE_FOR_URI(STR(value))`
fn encode_for_uri(value: Expression) -> Expression {
    Expression::FunctionCall(
        Function::EncodeForUri,
        vec![Expression::FunctionCall(Function::Str, vec![value])],
    )
}

