use crate::ir::Expr;

/// Where a node starts, as the length of the input remaining at that point.
/// Converted to a line number with [`line_at`] once parsing is done.
pub type Pos = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    /// Type as written, e.g. `Array[File]+?`.
    pub type_token: String,
    pub name: String,
    pub expr: Option<Expr>,
    pub at: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Expr,
    pub at: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandNode {
    pub raw: String,
    pub heredoc: bool,
    pub at: Pos,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskNode {
    pub name: String,
    pub at: Pos,
    pub inputs: Vec<Declaration>,
    pub outputs: Vec<Declaration>,
    pub privates: Vec<Declaration>,
    pub command: Option<CommandNode>,
    pub runtime: Vec<KeyValue>,
    pub meta: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    /// Possibly namespaced: `ns.task`.
    pub callee: String,
    pub alias: Option<String>,
    /// `name = expr`, or `name` alone for the shorthand binding.
    pub inputs: Vec<(String, Option<Expr>)>,
    pub at: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScatterNode {
    pub variable: String,
    pub collection: Expr,
    pub body: Vec<WorkflowElement>,
    pub at: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalNode {
    pub condition: Expr,
    pub body: Vec<WorkflowElement>,
    pub at: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowElement {
    Declaration(Declaration),
    Call(CallNode),
    Scatter(ScatterNode),
    Conditional(ConditionalNode),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowNode {
    pub name: String,
    pub at: Pos,
    pub inputs: Vec<Declaration>,
    pub outputs: Vec<Declaration>,
    pub meta: Vec<KeyValue>,
    pub body: Vec<WorkflowElement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportNode {
    pub path: String,
    pub alias: Option<String>,
    pub at: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructNode {
    pub name: String,
    pub at: Pos,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub version: Option<String>,
    pub imports: Vec<ImportNode>,
    pub structs: Vec<StructNode>,
    pub tasks: Vec<TaskNode>,
    pub workflows: Vec<WorkflowNode>,
}

/// A syntax error and the point parsing resumed from.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub at: Pos,
    pub message: String,
}

/// 1-based line of a node inside `source`.
pub fn line_at(source: &str, at: Pos) -> usize {
    let consumed = source.len().saturating_sub(at);
    source
        .get(..consumed)
        .map_or(1, |prefix| prefix.matches('\n').count() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_at() {
        let source = "version 1.0\n\ntask a {\n}";
        assert_eq!(line_at(source, source.len()), 1);
        let task = &source[source.find("task").unwrap()..];
        assert_eq!(line_at(source, task.len()), 3);
    }
}
