//! Language-neutral workflow model shared by every parser and writer.

pub mod command;
pub mod expr;
pub mod runtime;
pub mod types;

pub use command::{CommandPart, CommandTemplate};
pub use expr::{Expr, Placeholder, Reference, StringPart};
pub use runtime::{Runtime, RuntimeKey};
pub use types::{Dialect, TypeKind, TypeSpec};

use crate::diagnostic::Location;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub name: String,
    pub ty: TypeSpec,
    pub default: Option<Expr>,
}

impl Input {
    pub fn new(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Expr) -> Self {
        self.default = Some(default);
        self
    }

    /// Callers may leave this input unset.
    pub fn is_optional(&self) -> bool {
        self.ty.is_optional() || self.default.is_some()
    }
}

/// A named, typed expression: task/workflow outputs and private declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub ty: TypeSpec,
    pub expression: Expr,
}

pub type Output = Binding;

impl Binding {
    pub fn new(name: impl Into<String>, ty: TypeSpec, expression: Expr) -> Self {
        Self {
            name: name.into(),
            ty,
            expression,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub origin: Option<PathBuf>,
    pub line: Option<usize>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub locals: Vec<Binding>,
    pub command: CommandTemplate,
    pub runtime: Option<Runtime>,
    pub meta: BTreeMap<String, String>,
}

impl Task {
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn local(&self, name: &str) -> Option<&Binding> {
        self.locals.iter().find(|b| b.name == name)
    }

    pub fn location(&self) -> Location {
        Location {
            file: self.origin.clone(),
            line: self.line,
            scope: Some(format!("task {}", self.name)),
        }
    }
}

/// `scatter (variable in collection)` around a call.
///
/// `block` numbers the scatter blocks of one workflow in source order. Calls
/// share a scatter only when they sit in the same block, so two blocks with
/// the same header never compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scatter {
    #[serde(default)]
    pub block: usize,
    pub variable: String,
    pub collection: Expr,
}

impl Scatter {
    pub fn new(block: usize, variable: impl Into<String>, collection: Expr) -> Self {
        Self {
            block,
            variable: variable.into(),
            collection,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub callee: String,
    pub inputs: BTreeMap<String, Expr>,
    pub scatter: Option<Scatter>,
    pub line: Option<usize>,
}

impl Call {
    pub fn new(id: impl Into<String>, callee: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            callee: callee.into(),
            inputs: BTreeMap::new(),
            scatter: None,
            line: None,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.inputs.insert(name.into(), expr);
        self
    }

    /// Place the call in scatter block 0.
    pub fn with_scatter(self, variable: impl Into<String>, collection: Expr) -> Self {
        self.in_scatter(Scatter::new(0, variable, collection))
    }

    pub fn in_scatter(mut self, scatter: Scatter) -> Self {
        self.scatter = Some(scatter);
        self
    }

    /// Expressions this call reads: its input bindings and scatter collection.
    pub fn expressions(&self) -> impl Iterator<Item = &Expr> {
        self.scatter
            .iter()
            .map(|s| &s.collection)
            .chain(self.inputs.values())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub path: String,
    pub namespace: String,
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowKind {
    /// The source declared a `workflow` block.
    Workflow,
    /// Tasks only; the name comes from the file.
    Library,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub kind: WorkflowKind,
    pub version: Option<String>,
    pub origin: Option<PathBuf>,
    pub line: Option<usize>,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub bindings: Vec<Binding>,
    pub tasks: Vec<Task>,
    pub subworkflows: Vec<Workflow>,
    pub calls: Vec<Call>,
    pub imports: Vec<Import>,
    pub meta: BTreeMap<String, String>,
}

/// Something a call can invoke.
#[derive(Debug, Clone, Copy)]
pub enum Callee<'a> {
    Task(&'a Task),
    Workflow(&'a Workflow),
}

impl<'a> Callee<'a> {
    pub fn inputs(&self) -> &'a [Input] {
        match self {
            Callee::Task(task) => &task.inputs,
            Callee::Workflow(workflow) => &workflow.inputs,
        }
    }

    pub fn outputs(&self) -> &'a [Output] {
        match self {
            Callee::Task(task) => &task.outputs,
            Callee::Workflow(workflow) => &workflow.outputs,
        }
    }

    pub fn input(&self, name: &str) -> Option<&'a Input> {
        self.inputs().iter().find(|i| i.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&'a Output> {
        self.outputs().iter().find(|o| o.name == name)
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: WorkflowKind::Workflow,
            version: None,
            origin: None,
            line: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            bindings: Vec::new(),
            tasks: Vec::new(),
            subworkflows: Vec::new(),
            calls: Vec::new(),
            imports: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn library(name: impl Into<String>) -> Self {
        Self {
            kind: WorkflowKind::Library,
            ..Self::new(name)
        }
    }

    pub fn is_library(&self) -> bool {
        self.kind == WorkflowKind::Library
    }

    /// First task with this name; duplicates are a validation error.
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn subworkflow(&self, name: &str) -> Option<&Workflow> {
        self.subworkflows.iter().find(|w| w.name == name)
    }

    pub fn callee(&self, name: &str) -> Option<Callee<'_>> {
        self.task(name)
            .map(Callee::Task)
            .or_else(|| self.subworkflow(name).map(Callee::Workflow))
    }

    pub fn call(&self, id: &str) -> Option<&Call> {
        self.calls.iter().find(|c| c.id == id)
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    pub fn location(&self) -> Location {
        Location {
            file: self.origin.clone(),
            line: self.line,
            scope: Some(format!("workflow {}", self.name)),
        }
    }

    pub fn call_location(&self, call: &Call) -> Location {
        Location {
            file: self.origin.clone(),
            line: call.line,
            scope: Some(format!("call {}", call.id)),
        }
    }

    /// Tasks ordered by name; the order every writer emits them in.
    pub fn sorted_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.iter().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    pub fn sorted_subworkflows(&self) -> Vec<&Workflow> {
        let mut workflows: Vec<&Workflow> = self.subworkflows.iter().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        workflows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Workflow {
        let mut workflow = Workflow::new("pipeline");
        workflow.inputs.push(Input::new("reads", TypeSpec::file()));
        workflow.tasks.push(Task {
            name: "zip".to_string(),
            ..Task::default()
        });
        workflow.tasks.push(Task {
            name: "align".to_string(),
            inputs: vec![Input::new("fastq", TypeSpec::file())],
            outputs: vec![Binding::new("bam", TypeSpec::file(), Expr::text("out.bam"))],
            ..Task::default()
        });
        workflow
            .calls
            .push(Call::new("align", "align").with_input("fastq", Expr::ident("reads")));
        workflow
    }

    #[test]
    fn test_callee_lookup() {
        let workflow = sample();
        let callee = workflow.callee("align").unwrap();
        assert!(callee.input("fastq").is_some());
        assert!(callee.output("bam").is_some());
        assert!(workflow.callee("missing").is_none());
    }

    #[test]
    fn test_sorted_tasks_are_alphabetical() {
        let workflow = sample();
        let names: Vec<&str> = workflow.sorted_tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["align", "zip"]);
    }

    #[test]
    fn test_call_expressions_include_scatter() {
        let call = Call::new("c", "t")
            .with_input("x", Expr::ident("s"))
            .with_scatter("s", Expr::ident("items"));
        let exprs: Vec<String> = call.expressions().map(|e| e.to_string()).collect();
        assert_eq!(exprs, vec!["items", "s"]);
    }

    #[test]
    fn test_input_optionality() {
        assert!(!Input::new("a", TypeSpec::int()).is_optional());
        assert!(Input::new("b", TypeSpec::int().into_optional()).is_optional());
        assert!(Input::new("c", TypeSpec::int())
            .with_default(Expr::Int(1))
            .is_optional());
    }
}
