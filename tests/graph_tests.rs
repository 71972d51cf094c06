use std::collections::HashMap;
use wdl2cwl::convert::analyze;
use wdl2cwl::{parse_wdl, ConvertError, DependencyGraph, Workflow};

const CHAIN: &str = r#"version 1.0

workflow chain {
  input {
    File reads
  }

  call step as A { input: x = reads }
  call step as B { input: x = A.out }
  call step as C { input: x = B.out }

  output {
    File final = C.out
  }
}

task step {
  input {
    File x
  }
  command <<<
    cat ~{x} > out.txt
  >>>
  output {
    File out = "out.txt"
  }
}
"#;

fn parse(source: &str) -> Workflow {
    let (workflow, diagnostics) = parse_wdl(source, None).unwrap();
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    workflow
}

fn with_independent_call(source: &str) -> String {
    source.replace(
        "  call step as C { input: x = B.out }\n",
        "  call step as C { input: x = B.out }\n  call step as D { input: x = reads }\n",
    )
}

#[test]
fn test_chain_has_no_parallelism() {
    let graph = DependencyGraph::build(&parse(CHAIN));
    assert_eq!(graph.topological_order().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(graph.max_parallelism().unwrap(), 1);
    assert_eq!(
        graph.levels().unwrap(),
        vec![vec!["A".to_string()], vec!["B".to_string()], vec!["C".to_string()]]
    );
}

#[test]
fn test_independent_call_widens_first_level() {
    let graph = DependencyGraph::build(&parse(&with_independent_call(CHAIN)));
    assert_eq!(graph.max_parallelism().unwrap(), 2);
    let levels = graph.levels().unwrap();
    assert_eq!(levels[0], vec!["A".to_string(), "D".to_string()]);
    assert_eq!(levels.len(), 3);
}

#[test]
fn test_topological_order_respects_every_edge() {
    let source = r#"version 1.0
workflow fan {
  input {
    File reads
  }
  call step as split { input: x = reads }
  call step as left { input: x = split.out }
  call step as right { input: x = split.out }
  String joined = left.out + right.out
  call step as merge { input: x = joined }
}
task step {
  input {
    File x
  }
  command <<< true >>>
  output {
    File out = "out.txt"
  }
}
"#;
    let graph = DependencyGraph::build(&parse(source));
    let order = graph.topological_order().unwrap();
    assert_eq!(order.len(), graph.node_count());

    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    for (from, to) in graph.edges() {
        assert!(position[from] < position[to], "{} must precede {}", from, to);
    }
    assert_eq!(
        graph.dependencies_of("merge").into_iter().collect::<Vec<_>>(),
        vec!["left", "right"]
    );
    assert_eq!(graph.max_parallelism().unwrap(), 2);
}

#[test]
fn test_cycle_is_reported() {
    let source = CHAIN.replace("call step as A { input: x = reads }", "call step as A { input: x = C.out }");
    let graph = DependencyGraph::build(&parse(&source));
    assert!(graph.has_cycles());
    match graph.topological_order() {
        Err(ConvertError::Cycle { nodes }) => {
            assert_eq!(nodes.first(), nodes.last());
            for id in ["A", "B", "C"] {
                assert!(nodes.contains(&id.to_string()), "{:?}", nodes);
            }
        }
        other => panic!("expected a cycle, got {:?}", other),
    }
    assert!(graph.levels().is_err());
}

#[test]
fn test_analysis_report() {
    let workflow = parse(&with_independent_call(CHAIN));
    let report = analyze(&workflow, Vec::new());
    assert_eq!(report.workflow, "chain");
    assert_eq!(report.task_count, 1);
    assert_eq!(report.call_count, 4);
    assert!(!report.has_cycles);
    assert_eq!(report.max_parallelism, Some(2));
    assert_eq!(report.dependencies["B"], vec!["A".to_string()]);
    assert!(report.dependencies["D"].is_empty());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["max_parallelism"], 2);
    assert!(json.get("dot").is_none());
}

#[test]
fn test_dot_rendering() {
    let dot = DependencyGraph::build(&parse(CHAIN)).to_dot();
    assert!(dot.starts_with("digraph \"chain\" {"));
    assert!(dot.contains("\"call_A\" -> \"call_B\" [label=\"out\"];"));
    assert!(dot.contains("\"input_reads\" -> \"call_A\";"));
    assert!(dot.contains("\"call_C\" -> \"output_final\";"));
}
