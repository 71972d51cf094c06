use super::ast::{
    line_at, CallNode, CommandNode, Declaration, Document, KeyValue, Pos, SyntaxError, TaskNode,
    WorkflowElement, WorkflowNode,
};
use crate::diagnostic::{Diagnostic, DiagnosticKind, Location};
use crate::ir::types::parse_type;
use crate::ir::{
    Binding, Call, CommandTemplate, Expr, Import, Input, Runtime, Scatter, Task, TypeSpec,
    Workflow,
};
use std::collections::BTreeMap;
use std::path::Path;

/// Namespace an import gets when it has no `as` clause: the file stem.
fn default_namespace(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(path)
        .to_string()
}

pub(crate) struct Lowering<'a> {
    source: &'a str,
    origin: Option<&'a Path>,
    diagnostics: Vec<Diagnostic>,
    scatter_blocks: usize,
}

impl<'a> Lowering<'a> {
    pub(crate) fn new(source: &'a str, origin: Option<&'a Path>) -> Self {
        Self {
            source,
            origin,
            diagnostics: Vec::new(),
            scatter_blocks: 0,
        }
    }

    fn line(&self, at: Pos) -> usize {
        line_at(self.source, at)
    }

    fn location(&self, at: Pos, scope: Option<&str>) -> Location {
        Location {
            file: self.origin.map(Path::to_path_buf),
            line: Some(self.line(at)),
            scope: scope.map(str::to_string),
        }
    }

    fn error(&mut self, kind: DiagnosticKind, at: Pos, scope: Option<&str>, message: String) {
        let location = self.location(at, scope);
        self.diagnostics.push(Diagnostic::error(kind, location, message));
    }

    fn warn(&mut self, kind: DiagnosticKind, at: Pos, scope: Option<&str>, message: String) {
        let location = self.location(at, scope);
        self.diagnostics.push(Diagnostic::warning(kind, location, message));
    }

    fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    fn library_name(&self) -> String {
        self.origin
            .and_then(|path| path.file_stem())
            .and_then(|stem| stem.to_str())
            .unwrap_or("main")
            .to_string()
    }

    pub(crate) fn lower(
        mut self,
        document: Document,
        syntax_errors: Vec<SyntaxError>,
    ) -> (Workflow, Vec<Diagnostic>) {
        let empty = document.tasks.is_empty()
            && document.workflows.is_empty()
            && document.imports.is_empty()
            && syntax_errors.is_empty();

        for err in syntax_errors {
            self.error(DiagnosticKind::Parse, err.at, None, err.message);
        }
        for node in &document.structs {
            let scope = format!("struct {}", node.name);
            self.error(
                DiagnosticKind::UnsupportedConstruct,
                node.at,
                Some(&scope),
                format!("struct definition '{}' is not supported", node.name),
            );
        }

        let imports: Vec<Import> = document
            .imports
            .into_iter()
            .map(|node| Import {
                namespace: node.alias.unwrap_or_else(|| default_namespace(&node.path)),
                line: Some(self.line(node.at)),
                path: node.path,
            })
            .collect();

        let tasks: Vec<Task> = document
            .tasks
            .into_iter()
            .filter_map(|node| self.lower_task(node))
            .collect();

        let mut workflows = document.workflows.into_iter();
        let mut workflow = match workflows.next() {
            Some(node) => self.lower_workflow(node),
            None => Workflow::library(self.library_name()),
        };
        for extra in workflows {
            let scope = format!("workflow {}", extra.name);
            self.error(
                DiagnosticKind::Parse,
                extra.at,
                Some(&scope),
                format!("a document may declare one workflow; '{}' is ignored", extra.name),
            );
        }

        if empty {
            self.diagnostics.push(Diagnostic::error(
                DiagnosticKind::Parse,
                Location::in_file(self.origin),
                "no tasks or workflows found in WDL document",
            ));
        }

        workflow.version = document.version;
        workflow.origin = self.origin.map(Path::to_path_buf);
        workflow.imports = imports;
        workflow.tasks = tasks;
        (workflow, self.diagnostics)
    }

    fn lower_type(&mut self, decl: &Declaration, scope: &str) -> Option<TypeSpec> {
        match parse_type(&decl.type_token) {
            Ok(ty) => {
                if decl.type_token.contains('+') {
                    self.warn(
                        DiagnosticKind::DroppedField,
                        decl.at,
                        Some(scope),
                        format!("non-empty qualifier '+' on '{}' is not preserved", decl.name),
                    );
                }
                Some(ty)
            }
            Err(err) => {
                self.error(
                    DiagnosticKind::Type,
                    decl.at,
                    Some(scope),
                    format!("{} in declaration of '{}'", err, decl.name),
                );
                None
            }
        }
    }

    fn lower_input(&mut self, decl: Declaration, scope: &str) -> Option<Input> {
        let ty = self.lower_type(&decl, scope)?;
        Some(Input {
            name: decl.name,
            ty,
            default: decl.expr,
        })
    }

    fn lower_binding(&mut self, decl: Declaration, scope: &str) -> Option<Binding> {
        let ty = self.lower_type(&decl, scope)?;
        match decl.expr {
            Some(expression) => Some(Binding::new(decl.name, ty, expression)),
            None => {
                self.error(
                    DiagnosticKind::Parse,
                    decl.at,
                    Some(scope),
                    format!("declaration '{}' needs a value", decl.name),
                );
                None
            }
        }
    }

    fn lower_command(
        &mut self,
        node: CommandNode,
        inputs: &[Input],
        locals: &[Binding],
        scope: &str,
    ) -> Option<CommandTemplate> {
        // Every private declaration is evaluated before the command runs,
        // wherever it appears in the task body, so all of them are in scope.
        let is_declared = |name: &str| {
            inputs.iter().any(|i| i.name == name) || locals.iter().any(|b| b.name == name)
        };
        let template = match CommandTemplate::parse(&node.raw, node.heredoc, &is_declared) {
            Ok(template) => template,
            Err(message) => {
                self.error(DiagnosticKind::Parse, node.at, Some(scope), message);
                return None;
            }
        };

        let mut resolved = true;
        for reference in template.references() {
            if !is_declared(&reference.root) {
                self.error(
                    DiagnosticKind::Reference,
                    node.at,
                    Some(scope),
                    format!("command references undeclared variable '{}'", reference.root),
                );
                resolved = false;
            }
        }
        resolved.then_some(template)
    }

    /// A task with any error is left out of the fragment.
    fn lower_task(&mut self, node: TaskNode) -> Option<Task> {
        let scope = format!("task {}", node.name);
        let errors_before = self.error_count();

        let inputs: Vec<Input> = node
            .inputs
            .into_iter()
            .filter_map(|decl| self.lower_input(decl, &scope))
            .collect();
        let locals: Vec<Binding> = node
            .privates
            .into_iter()
            .filter_map(|decl| self.lower_binding(decl, &scope))
            .collect();
        let outputs: Vec<Binding> = node
            .outputs
            .into_iter()
            .filter_map(|decl| self.lower_binding(decl, &scope))
            .collect();

        let command = match node.command {
            Some(command) => self.lower_command(command, &inputs, &locals, &scope),
            None => {
                self.error(
                    DiagnosticKind::Parse,
                    node.at,
                    Some(&scope),
                    "task has no command section".to_string(),
                );
                None
            }
        };

        let mut runtime = Runtime::default();
        for entry in node.runtime {
            runtime.insert(&entry.key, entry.value);
        }

        if self.error_count() > errors_before {
            return None;
        }
        Some(Task {
            line: Some(self.line(node.at)),
            name: node.name,
            origin: self.origin.map(Path::to_path_buf),
            inputs,
            outputs,
            locals,
            command: command?,
            runtime: (!runtime.is_empty()).then_some(runtime),
            meta: meta_map(node.meta),
        })
    }

    fn lower_workflow(&mut self, node: WorkflowNode) -> Workflow {
        let scope = format!("workflow {}", node.name);
        let mut workflow = Workflow::new(node.name.clone());
        workflow.line = Some(self.line(node.at));
        workflow.inputs = node
            .inputs
            .into_iter()
            .filter_map(|decl| self.lower_input(decl, &scope))
            .collect();
        workflow.outputs = node
            .outputs
            .into_iter()
            .filter_map(|decl| self.lower_binding(decl, &scope))
            .collect();
        workflow.meta = meta_map(node.meta);

        for element in node.body {
            self.lower_element(element, None, &scope, &mut workflow);
        }
        workflow
    }

    fn lower_element(
        &mut self,
        element: WorkflowElement,
        scatter: Option<&Scatter>,
        scope: &str,
        workflow: &mut Workflow,
    ) {
        match element {
            WorkflowElement::Declaration(decl) => {
                if scatter.is_some() {
                    self.error(
                        DiagnosticKind::UnsupportedConstruct,
                        decl.at,
                        Some(scope),
                        format!("declaration '{}' inside a scatter block", decl.name),
                    );
                } else if let Some(binding) = self.lower_binding(decl, scope) {
                    workflow.bindings.push(binding);
                }
            }
            WorkflowElement::Call(node) => {
                let call = self.lower_call(node, scatter);
                workflow.calls.push(call);
            }
            WorkflowElement::Scatter(node) => {
                if scatter.is_some() {
                    self.error(
                        DiagnosticKind::UnsupportedConstruct,
                        node.at,
                        Some(scope),
                        format!("nested scatter over '{}'", node.collection),
                    );
                    return;
                }
                let inner = Scatter::new(self.scatter_blocks, node.variable, node.collection);
                self.scatter_blocks += 1;
                for element in node.body {
                    self.lower_element(element, Some(&inner), scope, workflow);
                }
            }
            WorkflowElement::Conditional(node) => {
                self.error(
                    DiagnosticKind::UnsupportedConstruct,
                    node.at,
                    Some(scope),
                    format!("conditional block 'if ({})'", node.condition),
                );
            }
        }
    }

    fn lower_call(&self, node: CallNode, scatter: Option<&Scatter>) -> Call {
        let id = node.alias.clone().unwrap_or_else(|| {
            node.callee
                .rsplit('.')
                .next()
                .unwrap_or(&node.callee)
                .to_string()
        });
        let inputs = node
            .inputs
            .into_iter()
            .map(|(name, expr)| {
                let expr = expr.unwrap_or_else(|| Expr::ident(name.clone()));
                (name, expr)
            })
            .collect();
        Call {
            id,
            callee: node.callee,
            inputs,
            scatter: scatter.cloned(),
            line: Some(self.line(node.at)),
        }
    }
}

fn meta_map(entries: Vec<KeyValue>) -> BTreeMap<String, String> {
    entries
        .into_iter()
        .map(|entry| {
            let text = entry
                .value
                .as_plain_string()
                .unwrap_or_else(|| entry.value.to_string());
            (entry.key, text)
        })
        .collect()
}
