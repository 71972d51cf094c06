use super::js::{to_js, JsScope};
use super::{default_value, literal_value, requirement, type_value, WriterOptions};
use crate::diagnostic::{Diagnostic, Location};
use crate::error::{ConvertError, Result};
use crate::ir::{Call, Callee, Expr, Reference, TypeKind, TypeSpec, Workflow};
use crate::validation::infer_type;
use serde_yaml::{Mapping, Value};

pub(super) struct BuiltWorkflow {
    pub(super) document: Mapping,
    pub(super) diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq)]
enum SourceKind {
    /// `input`, or `step/output`.
    Param(String),
    Literal(serde_json::Value),
}

/// Where a step input or workflow output reads from. `scattered` marks a
/// value the step receives one element at a time.
#[derive(Debug, Clone, PartialEq)]
struct Source {
    kind: SourceKind,
    scattered: bool,
}

impl Source {
    fn param(id: impl Into<String>) -> Self {
        Source {
            kind: SourceKind::Param(id.into()),
            scattered: false,
        }
    }
}

/// `self` inside a `valueFrom`, plus literals the expression reads.
struct StepScope {
    resolved: Vec<(Reference, SourceKind)>,
    /// JavaScript for the value of the input's source.
    self_js: String,
}

impl JsScope for StepScope {
    fn reference(&self, root: &str, field: Option<&str>) -> std::result::Result<String, String> {
        let found = self
            .resolved
            .iter()
            .find(|(r, _)| r.root == root && r.field.as_deref() == field);
        match found.map(|(_, kind)| kind) {
            Some(SourceKind::Param(_)) => Ok(self.self_js.clone()),
            Some(SourceKind::Literal(value)) => Ok(value.to_string()),
            None => Err(format!("reference '{}'", root)),
        }
    }
}

fn self_js(ty: Option<&TypeSpec>) -> String {
    match ty.map(TypeSpec::kind) {
        Some(TypeKind::File) => "self.path".to_string(),
        Some(TypeKind::Array(item)) if item.is_file() => {
            "self.map(function(f) { return f.path; })".to_string()
        }
        _ => "self".to_string(),
    }
}

fn reference_expr(reference: &Reference) -> Expr {
    match &reference.field {
        Some(field) => Expr::member(reference.root.clone(), field.clone()),
        None => Expr::ident(reference.root.clone()),
    }
}

struct WorkflowBuilder<'a> {
    root: &'a Workflow,
    workflow: &'a Workflow,
    options: &'a WriterOptions,
    diagnostics: Vec<Diagnostic>,
    needs_js: bool,
    needs_scatter: bool,
    needs_subworkflow: bool,
    needs_step_expressions: bool,
}

pub(super) fn build(
    root: &Workflow,
    workflow: &Workflow,
    options: &WriterOptions,
    id: &str,
) -> Result<BuiltWorkflow> {
    WorkflowBuilder {
        root,
        workflow,
        options,
        diagnostics: Vec::new(),
        needs_js: false,
        needs_scatter: false,
        needs_subworkflow: false,
        needs_step_expressions: false,
    }
    .build(id)
}

impl<'a> WorkflowBuilder<'a> {
    /// Follow a name to the parameter or literal it stands for. Inside a
    /// scatter the scatter variable stands for its collection.
    fn resolve_reference(
        &self,
        call: Option<&Call>,
        root: &str,
        field: Option<&str>,
        seen: &mut Vec<String>,
    ) -> std::result::Result<Source, String> {
        let workflow = self.workflow;
        if let Some(field) = field {
            let Some(upstream) = workflow.call(root) else {
                return Err(format!("reference '{}.{}'", root, field));
            };
            let scattered = matches!(
                (call.and_then(|c| c.scatter.as_ref()), upstream.scatter.as_ref()),
                (Some(ours), Some(theirs)) if ours == theirs
            );
            return Ok(Source {
                kind: SourceKind::Param(format!("{}/{}", upstream.id, field)),
                scattered,
            });
        }

        if let Some(scatter) = call
            .and_then(|c| c.scatter.as_ref())
            .filter(|s| s.variable == root)
        {
            let collection = self.resolve_expr(None, &scatter.collection, seen)?;
            return Ok(Source {
                scattered: true,
                ..collection
            });
        }
        if workflow.input(root).is_some() {
            return Ok(Source::param(root));
        }
        let Some(binding) = workflow.binding(root) else {
            return Err(format!("undeclared name '{}'", root));
        };
        if let Some(value) = binding.expression.literal_value() {
            return Ok(Source {
                kind: SourceKind::Literal(value),
                scattered: false,
            });
        }
        if seen.iter().any(|name| name == root) {
            return Err(format!("declaration '{}' refers to itself", root));
        }
        seen.push(root.to_string());
        let source = self.resolve_expr(None, &binding.expression, seen);
        seen.pop();
        source
    }

    fn resolve_expr(
        &self,
        call: Option<&Call>,
        expr: &Expr,
        seen: &mut Vec<String>,
    ) -> std::result::Result<Source, String> {
        match expr {
            Expr::Ident(name) => self.resolve_reference(call, name, None, seen),
            Expr::Member { target, field } => match target.as_ref() {
                Expr::Ident(root) => self.resolve_reference(call, root, Some(field), seen),
                other => Err(format!("member access on '{}'", other)),
            },
            other => match other.literal_value() {
                Some(value) => Ok(Source {
                    kind: SourceKind::Literal(value),
                    scattered: false,
                }),
                None => Err(format!("expression '{}'", other)),
            },
        }
    }

    /// Inline workflow bindings that are neither literals nor aliases, so the
    /// expression reads upstream values directly.
    fn expand_bindings(
        &self,
        call: Option<&Call>,
        expr: &Expr,
        seen: &mut Vec<String>,
    ) -> std::result::Result<Expr, String> {
        let workflow = self.workflow;
        let scatter_variable = call
            .and_then(|c| c.scatter.as_ref())
            .map(|s| s.variable.as_str());
        expr.replace_idents(&mut |name: &str| {
            if scatter_variable == Some(name) || workflow.input(name).is_some() {
                return Ok(None);
            }
            let Some(binding) = workflow.binding(name) else {
                return Ok(None);
            };
            if binding.expression.is_literal()
                || self.resolve_expr(None, &binding.expression, &mut Vec::new()).is_ok()
            {
                return Ok(None);
            }
            if seen.iter().any(|n| n == name) {
                return Err(format!("declaration '{}' refers to itself", name));
            }
            seen.push(name.to_string());
            let expanded = self.expand_bindings(None, &binding.expression, seen);
            seen.pop();
            expanded.map(Some)
        })
    }

    fn literal(&self, ty: Option<&TypeSpec>, value: serde_json::Value) -> Result<Value> {
        match ty {
            Some(ty) => literal_value(ty, value),
            None => Ok(serde_yaml::to_value(value)?),
        }
    }

    /// One entry of a step's `in`; the flag is set when the step scatters
    /// over it.
    fn step_input(
        &mut self,
        call: &Call,
        callee: Callee<'_>,
        name: &str,
        expr: &Expr,
        location: &Location,
    ) -> Result<(Value, bool)> {
        let ty = callee.input(name).map(|input| &input.ty);
        if let Ok(source) = self.resolve_expr(Some(call), expr, &mut Vec::new()) {
            let value = match source.kind {
                SourceKind::Param(id) => Value::from(id),
                SourceKind::Literal(json) => {
                    let mut entry = Mapping::new();
                    entry.insert("default".into(), self.literal(ty, json)?);
                    Value::Mapping(entry)
                }
            };
            return Ok((value, source.scattered));
        }

        let unsupported = |construct: String| ConvertError::unsupported(location.clone(), construct);
        let expanded = self
            .expand_bindings(Some(call), expr, &mut Vec::new())
            .map_err(|c| unsupported(format!("{} in input '{}'", c, name)))?;
        let expr = &expanded;
        let mut resolved = Vec::new();
        let mut param: Option<(String, bool, Reference)> = None;
        for reference in expr.references() {
            let source = self
                .resolve_reference(
                    Some(call),
                    &reference.root,
                    reference.field.as_deref(),
                    &mut Vec::new(),
                )
                .map_err(|c| unsupported(format!("{} in input '{}'", c, name)))?;
            if let SourceKind::Param(id) = &source.kind {
                match &param {
                    Some((existing, _, _)) if existing != id => {
                        return Err(unsupported(format!(
                            "input '{}' combines '{}' and '{}'",
                            name, existing, id
                        )));
                    }
                    Some(_) => {}
                    None => param = Some((id.clone(), source.scattered, reference.clone())),
                }
            }
            resolved.push((reference, source.kind));
        }

        let source_type = param.as_ref().and_then(|(_, _, reference)| {
            infer_type(
                self.root,
                &reference_expr(reference),
                self.workflow,
                call.scatter.as_ref(),
            )
        });
        let scope = StepScope {
            resolved,
            self_js: self_js(source_type.as_ref()),
        };
        let js = to_js(expr, &scope).map_err(|c| unsupported(format!("{} in input '{}'", c, name)))?;
        self.needs_js = true;
        self.needs_step_expressions = true;

        let mut entry = Mapping::new();
        let scattered = match param {
            Some((id, scattered, _)) => {
                entry.insert("source".into(), id.into());
                scattered
            }
            None => false,
        };
        entry.insert("valueFrom".into(), format!("$({})", js).into());
        Ok((Value::Mapping(entry), scattered))
    }

    fn step(&mut self, call: &Call) -> Result<Value> {
        let root = self.root;
        let location = self.workflow.call_location(call);
        let callee = root.callee(&call.callee).ok_or_else(|| ConvertError::Reference {
            location: location.clone(),
            message: format!("call '{}' names unknown task or workflow '{}'", call.id, call.callee),
        })?;
        if matches!(callee, Callee::Workflow(_)) {
            self.needs_subworkflow = true;
        }

        let mut inputs = Mapping::new();
        let mut scatter = Vec::new();
        for (name, expr) in &call.inputs {
            let (value, scattered) = self.step_input(call, callee, name, expr, &location)?;
            if scattered {
                scatter.push(name.clone());
            }
            inputs.insert(name.as_str().into(), value);
        }

        if let Some(spec) = &call.scatter {
            if scatter.is_empty() {
                // The scatter variable is never read; iterate anyway.
                let mut name = spec.variable.clone();
                while callee.input(&name).is_some() || call.inputs.contains_key(&name) {
                    name.push('_');
                }
                let (value, _) =
                    self.step_input(call, callee, &name, &Expr::ident(spec.variable.clone()), &location)?;
                inputs.insert(name.as_str().into(), value);
                scatter.push(name);
            }
            self.needs_scatter = true;
        }

        let mut step = Mapping::new();
        step.insert("run".into(), format!("#{}", call.callee).into());
        if !scatter.is_empty() {
            let multiple = scatter.len() > 1;
            step.insert(
                "scatter".into(),
                Value::Sequence(scatter.into_iter().map(Value::from).collect()),
            );
            if multiple {
                step.insert("scatterMethod".into(), "dotproduct".into());
            }
        }
        step.insert("in".into(), Value::Mapping(inputs));
        step.insert(
            "out".into(),
            Value::Sequence(
                callee
                    .outputs()
                    .iter()
                    .map(|o| Value::from(o.name.as_str()))
                    .collect(),
            ),
        );
        Ok(Value::Mapping(step))
    }

    fn build(mut self, id: &str) -> Result<BuiltWorkflow> {
        let workflow = self.workflow;
        let location = workflow.location();

        let mut inputs = Mapping::new();
        for input in &workflow.inputs {
            let scoped = location.clone().with_scope(format!("input {}", input.name));
            let mut entry = Mapping::new();
            let ty = type_value(&input.ty, &input.name, self.options, &scoped, &mut self.diagnostics)?;
            entry.insert("type".into(), ty);
            if let Some(default) = &input.default {
                entry.insert(
                    "default".into(),
                    default_value(&input.ty, default, &input.name, &scoped)?,
                );
            }
            inputs.insert(input.name.as_str().into(), Value::Mapping(entry));
        }

        let mut outputs = Mapping::new();
        for output in &workflow.outputs {
            let scoped = location.clone().with_scope(format!("output {}", output.name));
            let source = self
                .resolve_expr(None, &output.expression, &mut Vec::new())
                .map_err(|c| ConvertError::unsupported(scoped.clone(), format!("output {}", c)))?;
            let SourceKind::Param(source) = source.kind else {
                return Err(ConvertError::unsupported(
                    scoped,
                    format!("output '{}' is a constant", output.name),
                ));
            };
            let mut entry = Mapping::new();
            let ty = type_value(&output.ty, &output.name, self.options, &scoped, &mut self.diagnostics)?;
            entry.insert("type".into(), ty);
            entry.insert("outputSource".into(), source.into());
            outputs.insert(output.name.as_str().into(), Value::Mapping(entry));
        }

        let mut steps = Mapping::new();
        for call in &workflow.calls {
            let step = self.step(call)?;
            steps.insert(call.id.as_str().into(), step);
        }

        let mut requirements = Vec::new();
        if self.needs_js {
            requirements.push(Value::Mapping(requirement("InlineJavascriptRequirement")));
        }
        if self.needs_scatter {
            requirements.push(Value::Mapping(requirement("ScatterFeatureRequirement")));
        }
        if self.needs_step_expressions {
            requirements.push(Value::Mapping(requirement("StepInputExpressionRequirement")));
        }
        if self.needs_subworkflow {
            requirements.push(Value::Mapping(requirement("SubworkflowFeatureRequirement")));
        }

        let mut document = Mapping::new();
        document.insert("class".into(), "Workflow".into());
        document.insert("id".into(), id.into());
        if let Some(description) = workflow.meta.get("description") {
            document.insert("doc".into(), description.as_str().into());
        }
        if !requirements.is_empty() {
            document.insert("requirements".into(), Value::Sequence(requirements));
        }
        document.insert("inputs".into(), Value::Mapping(inputs));
        document.insert("outputs".into(), Value::Mapping(outputs));
        document.insert("steps".into(), Value::Mapping(steps));

        Ok(BuiltWorkflow {
            document,
            diagnostics: self.diagnostics,
        })
    }
}
