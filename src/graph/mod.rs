//! Call dependency graph.
//!
//! Nodes are call ids; an edge `A -> B` means B reads an output of A, either
//! directly (`A.out`) or through a workflow binding that does.

use crate::error::{ConvertError, Result};
use crate::ir::{Expr, Workflow};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    name: String,
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    predecessors: Vec<BTreeSet<usize>>,
    successors: Vec<BTreeSet<usize>>,
    /// Output names carried by each edge, for rendering.
    labels: BTreeMap<(usize, usize), BTreeSet<String>>,
    inputs: Vec<(String, String)>,
    input_edges: BTreeSet<(String, usize)>,
    outputs: Vec<(String, String)>,
    output_edges: BTreeSet<(usize, String)>,
}

/// Call outputs an expression reads, following workflow bindings.
fn upstream_outputs(
    expr: &Expr,
    workflow: &Workflow,
    shadowed: Option<&str>,
    seen: &mut HashSet<String>,
    found: &mut Vec<(String, Option<String>)>,
) {
    for reference in expr.references() {
        if Some(reference.root.as_str()) == shadowed {
            continue;
        }
        if workflow.call(&reference.root).is_some() {
            found.push((reference.root, reference.field));
        } else if let Some(binding) = workflow.binding(&reference.root) {
            if seen.insert(binding.name.clone()) {
                upstream_outputs(&binding.expression, workflow, None, seen, found);
            }
        }
    }
}

fn workflow_inputs_read(expr: &Expr, workflow: &Workflow, shadowed: Option<&str>) -> Vec<String> {
    expr.references()
        .into_iter()
        .filter(|r| Some(r.root.as_str()) != shadowed && workflow.input(&r.root).is_some())
        .map(|r| r.root)
        .collect()
}

impl DependencyGraph {
    pub fn build(workflow: &Workflow) -> Self {
        let nodes: Vec<String> = workflow.calls.iter().map(|c| c.id.clone()).collect();
        let mut index = HashMap::new();
        for (i, id) in nodes.iter().enumerate() {
            index.entry(id.clone()).or_insert(i);
        }

        let mut graph = Self {
            name: workflow.name.clone(),
            predecessors: vec![BTreeSet::new(); nodes.len()],
            successors: vec![BTreeSet::new(); nodes.len()],
            nodes,
            index,
            labels: BTreeMap::new(),
            inputs: workflow
                .inputs
                .iter()
                .map(|i| (i.name.clone(), i.ty.to_string()))
                .collect(),
            input_edges: BTreeSet::new(),
            outputs: workflow
                .outputs
                .iter()
                .map(|o| (o.name.clone(), o.ty.to_string()))
                .collect(),
            output_edges: BTreeSet::new(),
        };

        for (consumer, call) in workflow.calls.iter().enumerate() {
            let shadowed = call.scatter.as_ref().map(|s| s.variable.as_str());
            for expr in call.expressions() {
                let mut found = Vec::new();
                upstream_outputs(expr, workflow, shadowed, &mut HashSet::new(), &mut found);
                for (producer, field) in found {
                    if let Some(&producer) = graph.index.get(&producer) {
                        graph.add_edge(producer, consumer, field);
                    }
                }
                for input in workflow_inputs_read(expr, workflow, shadowed) {
                    graph.input_edges.insert((input, consumer));
                }
            }
        }

        for output in &workflow.outputs {
            let mut found = Vec::new();
            upstream_outputs(&output.expression, workflow, None, &mut HashSet::new(), &mut found);
            for (producer, _) in found {
                if let Some(&producer) = graph.index.get(&producer) {
                    graph.output_edges.insert((producer, output.name.clone()));
                }
            }
        }

        graph
    }

    fn add_edge(&mut self, from: usize, to: usize, field: Option<String>) {
        self.successors[from].insert(to);
        self.predecessors[to].insert(from);
        let labels = self.labels.entry((from, to)).or_default();
        if let Some(field) = field {
            labels.insert(field);
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every edge as `(producer, consumer)`, producers in declaration order.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.successors
            .iter()
            .enumerate()
            .flat_map(|(from, targets)| {
                targets
                    .iter()
                    .map(move |&to| (self.nodes[from].as_str(), self.nodes[to].as_str()))
            })
            .collect()
    }

    /// Direct predecessors of a call. Unknown ids have none.
    pub fn dependencies_of(&self, call_id: &str) -> BTreeSet<&str> {
        self.index
            .get(call_id)
            .map(|&i| {
                self.predecessors[i]
                    .iter()
                    .map(|&p| self.nodes[p].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Kahn's algorithm; ready calls leave in declaration order.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &next in &self.successors[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < self.nodes.len() {
            let remaining: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
            return Err(ConvertError::Cycle {
                nodes: self.cycle_among(&remaining),
            });
        }
        Ok(order.into_iter().map(|i| self.nodes[i].clone()).collect())
    }

    /// Walk predecessors inside the unsorted remainder until a node repeats.
    /// Every remaining node has a remaining predecessor, so the walk always
    /// closes a loop.
    fn cycle_among(&self, remaining: &[bool]) -> Vec<String> {
        let Some(start) = remaining.iter().position(|&r| r) else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut position = HashMap::from([(start, 0usize)]);
        let mut current = start;
        loop {
            let Some(&prev) = self.predecessors[current].iter().find(|&&p| remaining[p]) else {
                break;
            };
            if let Some(&at) = position.get(&prev) {
                let mut cycle: Vec<String> = path[at..]
                    .iter()
                    .rev()
                    .map(|&i| self.nodes[i].clone())
                    .collect();
                cycle.push(self.nodes[prev].clone());
                return cycle;
            }
            position.insert(prev, path.len());
            path.push(prev);
            current = prev;
        }
        path.into_iter().map(|i| self.nodes[i].clone()).collect()
    }

    pub fn has_cycles(&self) -> bool {
        self.topological_order().is_err()
    }

    /// Calls grouped by the length of the longest path reaching them.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let order = self.topological_order()?;
        let mut depth = vec![0usize; self.nodes.len()];
        let mut levels: Vec<Vec<String>> = Vec::new();
        for id in order {
            let node = self.index[&id];
            let level = self.predecessors[node]
                .iter()
                .map(|&p| depth[p] + 1)
                .max()
                .unwrap_or(0);
            depth[node] = level;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id);
        }
        Ok(levels)
    }

    /// Width of the widest level. An upper bound on concurrently runnable
    /// calls, not a schedule.
    pub fn max_parallelism(&self) -> Result<usize> {
        Ok(self.levels()?.iter().map(Vec::len).max().unwrap_or(0))
    }

    pub fn to_dot(&self) -> String {
        let mut dot = String::new();

        writeln!(&mut dot, "digraph \"{}\" {{", escape(&self.name)).unwrap_or(());
        writeln!(&mut dot, "  rankdir=TB;").unwrap_or(());
        writeln!(&mut dot, "  node [shape=box, style=rounded];").unwrap_or(());
        writeln!(&mut dot).unwrap_or(());

        if !self.inputs.is_empty() {
            writeln!(&mut dot, "  subgraph cluster_inputs {{").unwrap_or(());
            writeln!(&mut dot, "    label=\"Inputs\";").unwrap_or(());
            writeln!(&mut dot, "    style=filled;").unwrap_or(());
            writeln!(&mut dot, "    color=lightgrey;").unwrap_or(());
            for (name, ty) in &self.inputs {
                writeln!(
                    &mut dot,
                    "    \"input_{}\" [label=\"{}: {}\", shape=ellipse];",
                    escape(name),
                    escape(name),
                    escape(ty)
                )
                .unwrap_or(());
            }
            writeln!(&mut dot, "  }}").unwrap_or(());
            writeln!(&mut dot).unwrap_or(());
        }

        for id in &self.nodes {
            writeln!(
                &mut dot,
                "  \"call_{}\" [label=\"{}\", style=\"filled,rounded\", fillcolor=lightblue];",
                escape(id),
                escape(id)
            )
            .unwrap_or(());
        }
        writeln!(&mut dot).unwrap_or(());

        for (input, to) in &self.input_edges {
            writeln!(
                &mut dot,
                "  \"input_{}\" -> \"call_{}\";",
                escape(input),
                escape(&self.nodes[*to])
            )
            .unwrap_or(());
        }
        for ((from, to), fields) in &self.labels {
            let label = fields.iter().cloned().collect::<Vec<_>>().join(", ");
            writeln!(
                &mut dot,
                "  \"call_{}\" -> \"call_{}\" [label=\"{}\"];",
                escape(&self.nodes[*from]),
                escape(&self.nodes[*to]),
                escape(&label)
            )
            .unwrap_or(());
        }

        if !self.outputs.is_empty() {
            writeln!(&mut dot).unwrap_or(());
            writeln!(&mut dot, "  subgraph cluster_outputs {{").unwrap_or(());
            writeln!(&mut dot, "    label=\"Outputs\";").unwrap_or(());
            writeln!(&mut dot, "    style=filled;").unwrap_or(());
            writeln!(&mut dot, "    color=lightgreen;").unwrap_or(());
            for (name, ty) in &self.outputs {
                writeln!(
                    &mut dot,
                    "    \"output_{}\" [label=\"{}: {}\", shape=ellipse];",
                    escape(name),
                    escape(name),
                    escape(ty)
                )
                .unwrap_or(());
            }
            writeln!(&mut dot, "  }}").unwrap_or(());
            for (from, output) in &self.output_edges {
                writeln!(
                    &mut dot,
                    "  \"call_{}\" -> \"output_{}\";",
                    escape(&self.nodes[*from]),
                    escape(output)
                )
                .unwrap_or(());
            }
        }

        writeln!(&mut dot, "}}").unwrap_or(());
        dot
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Binding, Call, Input, TypeSpec};

    fn chain() -> Workflow {
        let mut workflow = Workflow::new("chain");
        workflow.inputs.push(Input::new("reads", TypeSpec::file()));
        workflow.calls = vec![
            Call::new("a", "t").with_input("x", Expr::ident("reads")),
            Call::new("b", "t").with_input("x", Expr::member("a", "out")),
            Call::new("c", "t").with_input("x", Expr::member("b", "out")),
        ];
        workflow
            .outputs
            .push(Binding::new("final", TypeSpec::file(), Expr::member("c", "out")));
        workflow
    }

    #[test]
    fn test_chain_order_and_parallelism() {
        let graph = DependencyGraph::build(&chain());
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(graph.max_parallelism().unwrap(), 1);
        assert!(!graph.has_cycles());
        assert_eq!(graph.dependencies_of("c"), BTreeSet::from(["b"]));
        assert!(graph.dependencies_of("a").is_empty());
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let mut workflow = Workflow::new("w");
        workflow.calls = vec![
            Call::new("late", "t").with_input("x", Expr::member("early", "out")),
            Call::new("free", "t"),
            Call::new("early", "t"),
        ];
        let graph = DependencyGraph::build(&workflow);
        assert_eq!(graph.topological_order().unwrap(), vec!["free", "early", "late"]);
    }

    #[test]
    fn test_binding_carries_dependency() {
        let mut workflow = chain();
        workflow.bindings.push(Binding::new(
            "prefix",
            TypeSpec::string(),
            Expr::member("a", "name"),
        ));
        workflow
            .calls
            .push(Call::new("d", "t").with_input("x", Expr::ident("prefix")));
        let graph = DependencyGraph::build(&workflow);
        assert_eq!(graph.dependencies_of("d"), BTreeSet::from(["a"]));
    }

    #[test]
    fn test_scatter_variable_shadows_call_id() {
        let mut workflow = Workflow::new("w");
        workflow.calls = vec![
            Call::new("item", "t"),
            Call::new("each", "t")
                .with_input("x", Expr::ident("item"))
                .with_scatter("item", Expr::ident("items")),
        ];
        let graph = DependencyGraph::build(&workflow);
        assert!(graph.dependencies_of("each").is_empty());
    }

    #[test]
    fn test_cycle_reports_nodes() {
        let mut workflow = Workflow::new("w");
        workflow.calls = vec![
            Call::new("start", "t"),
            Call::new("a", "t").with_input("x", Expr::member("b", "out")),
            Call::new("b", "t").with_input("x", Expr::member("a", "out")),
        ];
        let graph = DependencyGraph::build(&workflow);
        assert!(graph.has_cycles());
        match graph.topological_order() {
            Err(ConvertError::Cycle { nodes }) => {
                assert_eq!(nodes.len(), 3);
                assert_eq!(nodes.first(), nodes.last());
                assert!(nodes.contains(&"a".to_string()));
                assert!(nodes.contains(&"b".to_string()));
                assert!(!nodes.contains(&"start".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
        assert!(graph.max_parallelism().is_err());
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut workflow = Workflow::new("w");
        workflow.calls = vec![Call::new("a", "t").with_input("x", Expr::member("a", "out"))];
        let graph = DependencyGraph::build(&workflow);
        assert!(graph.has_cycles());
    }

    #[test]
    fn test_to_dot() {
        let dot = DependencyGraph::build(&chain()).to_dot();
        assert!(dot.starts_with("digraph \"chain\" {"));
        assert!(dot.contains("\"input_reads\" -> \"call_a\";"));
        assert!(dot.contains("\"call_a\" -> \"call_b\" [label=\"out\"];"));
        assert!(dot.contains("\"call_c\" -> \"output_final\";"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_empty_workflow() {
        let graph = DependencyGraph::build(&Workflow::library("lib"));
        assert!(graph.topological_order().unwrap().is_empty());
        assert_eq!(graph.max_parallelism().unwrap(), 0);
    }
}
