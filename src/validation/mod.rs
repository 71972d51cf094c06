//! Read-only semantic checks over a resolved workflow.
//!
//! Categories run in a fixed order and never short-circuit: names,
//! references, types, scatters, cycles. Sub-workflows are checked with the
//! same rules; their callees resolve against the root task table.

use crate::diagnostic::{has_errors, Diagnostic, DiagnosticKind, Location};
use crate::error::ConvertError;
use crate::graph::DependencyGraph;
use crate::ir::expr::{BinaryOp, UnaryOp};
use crate::ir::types::is_assignable;
use crate::ir::{Call, Callee, Expr, Scatter, TypeKind, TypeSpec, Workflow};
use std::collections::HashSet;

/// Run every check. The flag is false when any ERROR was produced.
pub fn validate(workflow: &Workflow) -> (bool, Vec<Diagnostic>) {
    let mut validator = Validator::new(workflow);
    validator.check_names();
    validator.check_references();
    validator.check_types();
    validator.check_scatters();
    validator.check_cycles();
    let diagnostics = validator.diagnostics;
    (!has_errors(&diagnostics), diagnostics)
}

struct Validator<'a> {
    root: &'a Workflow,
    diagnostics: Vec<Diagnostic>,
}

/// Names visible to one expression.
#[derive(Clone, Copy)]
struct Scope<'a> {
    workflow: &'a Workflow,
    scatter: Option<&'a Scatter>,
}

impl<'a> Validator<'a> {
    fn new(root: &'a Workflow) -> Self {
        Self {
            root,
            diagnostics: Vec::new(),
        }
    }

    fn workflows(&self) -> impl Iterator<Item = &'a Workflow> {
        std::iter::once(self.root).chain(self.root.subworkflows.iter())
    }

    fn callee(&self, call: &Call) -> Option<Callee<'a>> {
        self.root.callee(&call.callee)
    }

    fn error(&mut self, kind: DiagnosticKind, location: Location, message: String) {
        self.diagnostics.push(Diagnostic::error(kind, location, message));
    }

    fn duplicates<'n>(
        &mut self,
        names: impl IntoIterator<Item = &'n str>,
        what: &str,
        location: &Location,
    ) {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for name in names {
            if !seen.insert(name) && reported.insert(name) {
                self.error(
                    DiagnosticKind::DuplicateName,
                    location.clone(),
                    format!("duplicate {} '{}'", what, name),
                );
            }
        }
    }

    fn check_names(&mut self) {
        let root_location = self.root.location();
        self.duplicates(
            self.root.tasks.iter().map(|t| t.name.as_str()),
            "task name",
            &root_location,
        );
        self.duplicates(
            self.root.subworkflows.iter().map(|w| w.name.as_str()),
            "workflow name",
            &root_location,
        );

        for task in &self.root.tasks {
            let location = task.location();
            self.duplicates(
                task.inputs
                    .iter()
                    .map(|i| i.name.as_str())
                    .chain(task.locals.iter().map(|b| b.name.as_str())),
                "input or declaration",
                &location,
            );
            self.duplicates(task.outputs.iter().map(|o| o.name.as_str()), "output", &location);
        }

        for workflow in self.workflows() {
            let location = workflow.location();
            self.duplicates(
                workflow
                    .inputs
                    .iter()
                    .map(|i| i.name.as_str())
                    .chain(workflow.bindings.iter().map(|b| b.name.as_str())),
                "input or declaration",
                &location,
            );
            self.duplicates(
                workflow.outputs.iter().map(|o| o.name.as_str()),
                "output",
                &location,
            );
            self.duplicates(workflow.calls.iter().map(|c| c.id.as_str()), "call id", &location);
        }
    }

    fn check_references(&mut self) {
        for workflow in self.workflows() {
            for call in &workflow.calls {
                let location = workflow.call_location(call);
                match self.callee(call) {
                    None => self.error(
                        DiagnosticKind::Reference,
                        location.clone(),
                        format!("call '{}' refers to unknown task or workflow '{}'", call.id, call.callee),
                    ),
                    Some(callee) => {
                        for name in call.inputs.keys() {
                            if callee.input(name).is_none() {
                                self.error(
                                    DiagnosticKind::Reference,
                                    location.clone(),
                                    format!("'{}' has no input named '{}'", call.callee, name),
                                );
                            }
                        }
                        for input in callee.inputs() {
                            if !input.is_optional() && !call.inputs.contains_key(&input.name) {
                                self.diagnostics.push(Diagnostic::warning(
                                    DiagnosticKind::Reference,
                                    location.clone(),
                                    format!(
                                        "required input '{}' of '{}' is not supplied",
                                        input.name, call.callee
                                    ),
                                ));
                            }
                        }
                    }
                }

                let scope = Scope {
                    workflow,
                    scatter: call.scatter.as_ref(),
                };
                for expr in call.expressions() {
                    self.check_expression_references(expr, scope, &location);
                }
            }

            let scope = Scope {
                workflow,
                scatter: None,
            };
            let location = workflow.location();
            for binding in workflow.bindings.iter().chain(workflow.outputs.iter()) {
                self.check_expression_references(
                    &binding.expression,
                    scope,
                    &location.clone().with_scope(format!("declaration {}", binding.name)),
                );
            }
        }
    }

    fn check_expression_references(&mut self, expr: &Expr, scope: Scope<'a>, location: &Location) {
        for reference in expr.references() {
            let root = reference.root.as_str();
            if scope.scatter.map(|s| s.variable.as_str()) == Some(root)
                || scope.workflow.input(root).is_some()
                || scope.workflow.binding(root).is_some()
            {
                continue;
            }
            let Some(upstream) = scope.workflow.call(root) else {
                self.error(
                    DiagnosticKind::Reference,
                    location.clone(),
                    format!("reference to undeclared name '{}'", root),
                );
                continue;
            };
            match (&reference.field, self.callee(upstream)) {
                (None, _) => self.error(
                    DiagnosticKind::Reference,
                    location.clone(),
                    format!("call '{}' is referenced without naming an output", root),
                ),
                (Some(field), Some(callee)) if callee.output(field).is_none() => self.error(
                    DiagnosticKind::Reference,
                    location.clone(),
                    format!("call '{}' has no output named '{}'", root, field),
                ),
                _ => {}
            }
        }
    }

    fn check_types(&mut self) {
        for workflow in self.workflows() {
            for call in &workflow.calls {
                let Some(callee) = self.callee(call) else {
                    continue;
                };
                let scope = Scope {
                    workflow,
                    scatter: call.scatter.as_ref(),
                };
                for (name, expr) in &call.inputs {
                    let (Some(target), Some(source)) =
                        (callee.input(name), infer_type(self.root, expr, scope.workflow, scope.scatter))
                    else {
                        continue;
                    };
                    if !is_assignable(&source, &target.ty) {
                        self.error(
                            DiagnosticKind::TypeMismatch,
                            workflow.call_location(call),
                            format!(
                                "input '{}' of '{}' expects {} but '{}' is {}",
                                name, call.callee, target.ty, expr, source
                            ),
                        );
                    }
                }
            }

            for binding in workflow.bindings.iter().chain(workflow.outputs.iter()) {
                let Some(source) = infer_type(self.root, &binding.expression, workflow, None) else {
                    continue;
                };
                if !is_assignable(&source, &binding.ty) {
                    self.error(
                        DiagnosticKind::TypeMismatch,
                        workflow.location().with_scope(format!("declaration {}", binding.name)),
                        format!(
                            "'{}' is declared {} but '{}' is {}",
                            binding.name, binding.ty, binding.expression, source
                        ),
                    );
                }
            }
        }
    }

    fn check_scatters(&mut self) {
        for workflow in self.workflows() {
            for call in &workflow.calls {
                let Some(scatter) = &call.scatter else {
                    continue;
                };
                let Some(ty) = infer_type(self.root, &scatter.collection, workflow, None) else {
                    continue;
                };
                if !ty.is_array() || ty.is_optional() {
                    self.error(
                        DiagnosticKind::MalformedScatter,
                        workflow.call_location(call),
                        format!(
                            "scatter over '{}' needs an array but it is {}",
                            scatter.collection, ty
                        ),
                    );
                }
            }
        }
    }

    fn check_cycles(&mut self) {
        for workflow in self.workflows() {
            if let Err(ConvertError::Cycle { nodes }) =
                DependencyGraph::build(workflow).topological_order()
            {
                self.error(
                    DiagnosticKind::DependencyCycle,
                    workflow.location(),
                    format!("calls form a dependency cycle: {}", nodes.join(" -> ")),
                );
            }
        }
    }
}

fn same_scatter(a: Option<&Scatter>, b: Option<&Scatter>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Static type of an expression inside `workflow`, or `None` when it cannot
/// be determined without evaluation. Call outputs read from outside the
/// call's scatter are arrays.
pub(crate) fn infer_type(
    root: &Workflow,
    expr: &Expr,
    workflow: &Workflow,
    scatter: Option<&Scatter>,
) -> Option<TypeSpec> {
    let infer = |e: &Expr| infer_type(root, e, workflow, scatter);
    match expr {
        Expr::None => None,
        Expr::Boolean(_) => Some(TypeSpec::boolean()),
        Expr::Int(_) => Some(TypeSpec::int()),
        Expr::Float(_) => Some(TypeSpec::float()),
        Expr::String(_) => Some(TypeSpec::string()),
        Expr::Ident(name) => {
            if let Some(scatter) = scatter.filter(|s| &s.variable == name) {
                return infer_type(root, &scatter.collection, workflow, None)?
                    .item_type()
                    .cloned();
            }
            workflow
                .input(name)
                .map(|i| i.ty.clone())
                .or_else(|| workflow.binding(name).map(|b| b.ty.clone()))
        }
        Expr::Member { target, field } => {
            let Expr::Ident(call_id) = target.as_ref() else {
                return None;
            };
            let upstream = workflow.call(call_id)?;
            let ty = root.callee(&upstream.callee)?.output(field)?.ty.clone();
            match &upstream.scatter {
                Some(_) if !same_scatter(upstream.scatter.as_ref(), scatter) => {
                    Some(TypeSpec::array(ty))
                }
                _ => Some(ty),
            }
        }
        Expr::Index { target, .. } => infer(target)?.item_type().cloned(),
        Expr::Array(items) => {
            let mut types = items.iter().map(infer);
            let first = types.next()??;
            types
                .all(|t| t.as_ref() == Some(&first))
                .then(|| TypeSpec::array(first))
        }
        Expr::Map(_) => None,
        Expr::Apply { function, args } => match function.as_str() {
            "stdout" | "stderr" => Some(TypeSpec::file()),
            "glob" => Some(TypeSpec::array(TypeSpec::file())),
            "read_string" | "basename" | "sub" => Some(TypeSpec::string()),
            "read_int" | "length" => Some(TypeSpec::int()),
            "read_float" | "size" => Some(TypeSpec::float()),
            "read_boolean" | "defined" => Some(TypeSpec::boolean()),
            "read_lines" => Some(TypeSpec::array(TypeSpec::string())),
            "select_first" => {
                let item = infer(args.first()?)?.item_type()?.clone();
                Some(item.with_optional(false))
            }
            "select_all" => {
                let item = infer(args.first()?)?.item_type()?.clone();
                Some(TypeSpec::array(item.with_optional(false)))
            }
            "flatten" => infer(args.first()?)?.item_type().cloned(),
            _ => None,
        },
        Expr::Unary { op, operand } => match op {
            UnaryOp::Not => Some(TypeSpec::boolean()),
            UnaryOp::Negate => infer(operand),
        },
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::Or
            | BinaryOp::And
            | BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => Some(TypeSpec::boolean()),
            _ => {
                let (lhs, rhs) = (infer(lhs)?, infer(rhs)?);
                match (lhs.kind(), rhs.kind()) {
                    (TypeKind::String, _) | (_, TypeKind::String) if *op == BinaryOp::Add => {
                        Some(TypeSpec::string())
                    }
                    (TypeKind::Int, TypeKind::Int) => Some(TypeSpec::int()),
                    (TypeKind::Int | TypeKind::Float, TypeKind::Int | TypeKind::Float) => {
                        Some(TypeSpec::float())
                    }
                    _ => None,
                }
            }
        },
        Expr::IfThenElse { then, otherwise, .. } => {
            let then = infer(then)?;
            (infer(otherwise)? == then).then_some(then)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Binding, CommandTemplate, Input, Task};

    fn task(name: &str, input: (&str, TypeSpec), output: (&str, TypeSpec)) -> Task {
        Task {
            name: name.to_string(),
            inputs: vec![Input::new(input.0, input.1)],
            outputs: vec![Binding::new(output.0, output.1, Expr::text("out"))],
            command: CommandTemplate::default(),
            ..Task::default()
        }
    }

    fn base() -> Workflow {
        let mut workflow = Workflow::new("w");
        workflow
            .inputs
            .push(Input::new("samples", TypeSpec::array(TypeSpec::file())));
        workflow.inputs.push(Input::new("reference", TypeSpec::file()));
        workflow.tasks.push(task(
            "align",
            ("fastq", TypeSpec::file()),
            ("bam", TypeSpec::file()),
        ));
        workflow.tasks.push(task(
            "merge",
            ("bams", TypeSpec::array(TypeSpec::file())),
            ("merged", TypeSpec::file()),
        ));
        workflow.calls.push(
            Call::new("align", "align")
                .with_input("fastq", Expr::ident("s"))
                .with_scatter("s", Expr::ident("samples")),
        );
        workflow
            .calls
            .push(Call::new("merge", "merge").with_input("bams", Expr::member("align", "bam")));
        workflow
            .outputs
            .push(Binding::new("final", TypeSpec::file(), Expr::member("merge", "merged")));
        workflow
    }

    fn kinds(diagnostics: &[Diagnostic]) -> Vec<DiagnosticKind> {
        diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_valid_workflow() {
        let (valid, diagnostics) = validate(&base());
        assert!(valid);
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    }

    #[test]
    fn test_scattered_output_is_an_array_downstream() {
        let workflow = base();
        let ty = infer_type(&workflow, &Expr::member("align", "bam"), &workflow, None).unwrap();
        assert_eq!(ty, TypeSpec::array(TypeSpec::file()));

        let scatter = workflow.calls[0].scatter.as_ref();
        let inside = infer_type(&workflow, &Expr::member("align", "bam"), &workflow, scatter).unwrap();
        assert_eq!(inside, TypeSpec::file());
        let item = infer_type(&workflow, &Expr::ident("s"), &workflow, scatter).unwrap();
        assert_eq!(item, TypeSpec::file());
    }

    #[test]
    fn test_unknown_callee_input() {
        let mut workflow = base();
        workflow.calls[1]
            .inputs
            .insert("bogus".to_string(), Expr::ident("reference"));
        let (valid, diagnostics) = validate(&workflow);
        assert!(!valid);
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::Reference]);
        assert!(diagnostics[0].message.contains("bogus"));
    }

    #[test]
    fn test_missing_required_input_is_a_warning() {
        let mut workflow = base();
        workflow.calls[1].inputs.clear();
        let (valid, diagnostics) = validate(&workflow);
        assert!(valid);
        assert_eq!(diagnostics.len(), 1);
        assert!(!diagnostics[0].is_error());
    }

    #[test]
    fn test_unknown_output_field() {
        let mut workflow = base();
        workflow.outputs[0].expression = Expr::member("merge", "nope");
        let (valid, diagnostics) = validate(&workflow);
        assert!(!valid);
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::Reference]);
    }

    #[test]
    fn test_output_type_mismatch() {
        let mut workflow = base();
        workflow.outputs.push(Binding::new(
            "bams",
            TypeSpec::file(),
            Expr::member("align", "bam"),
        ));
        let (valid, diagnostics) = validate(&workflow);
        assert!(!valid);
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::TypeMismatch]);
    }

    #[test]
    fn test_optional_array_scatter_is_malformed() {
        let mut workflow = base();
        workflow.inputs[0] = Input::new("samples", TypeSpec::array(TypeSpec::file()).into_optional());
        let (_, diagnostics) = validate(&workflow);
        assert!(kinds(&diagnostics).contains(&DiagnosticKind::MalformedScatter));
    }

    #[test]
    fn test_duplicate_call_id_reported_once() {
        let mut workflow = base();
        let extra = workflow.calls[1].clone();
        workflow.calls.push(extra.clone());
        workflow.calls.push(extra);
        let (_, diagnostics) = validate(&workflow);
        let duplicates: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::DuplicateName)
            .collect();
        assert_eq!(duplicates.len(), 1);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut workflow = base();
        workflow.calls[0]
            .inputs
            .insert("fastq".to_string(), Expr::member("merge", "merged"));
        let (valid, diagnostics) = validate(&workflow);
        assert!(!valid);
        assert!(kinds(&diagnostics).contains(&DiagnosticKind::DependencyCycle));
    }

    #[test]
    fn test_subworkflow_calls_resolve_against_root_tasks() {
        let mut root = base();
        let mut sub = Workflow::new("inner");
        sub.inputs.push(Input::new("fq", TypeSpec::file()));
        sub.calls
            .push(Call::new("align", "align").with_input("fastq", Expr::ident("fq")));
        root.subworkflows.push(sub);
        let (valid, diagnostics) = validate(&root);
        assert!(valid, "{:?}", diagnostics);

        root.subworkflows[0].calls[0].callee = "missing".to_string();
        let (valid, _) = validate(&root);
        assert!(!valid);
    }

    #[test]
    fn test_infer_function_and_operator_types() {
        let workflow = base();
        let infer = |e: Expr| infer_type(&workflow, &e, &workflow, None);
        assert_eq!(
            infer(Expr::Apply {
                function: "read_lines".to_string(),
                args: vec![Expr::Apply { function: "stdout".to_string(), args: vec![] }],
            }),
            Some(TypeSpec::array(TypeSpec::string()))
        );
        assert_eq!(
            infer(Expr::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr::Int(1)),
                rhs: Box::new(Expr::Float(0.5)),
            }),
            Some(TypeSpec::float())
        );
        assert_eq!(infer(Expr::Array(vec![])), None);
    }
}
