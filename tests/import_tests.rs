use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wdl2cwl::diagnostic::DiagnosticKind;
use wdl2cwl::{parse_wdl, resolve_imports, ConvertError, Converter, ImportCache, ImportResolver, WdlParser};

const MAIN: &str = r#"version 1.0

import "lib/common.wdl" as common

workflow analysis {
  input {
    File raw_data
  }

  call common.t { input: data = raw_data }

  output {
    String result = t.message
  }
}
"#;

const COMMON: &str = r#"version 1.0

task t {
  input {
    File data
  }

  command <<<
    wc -l ~{data}
  >>>

  output {
    String message = read_string(stdout())
  }
}
"#;

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn fixture(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        write(dir.path(), name, content);
    }
    dir
}

async fn resolve_file(path: &Path) -> (wdl2cwl::Workflow, Vec<wdl2cwl::Diagnostic>) {
    let content = std::fs::read_to_string(path).unwrap();
    let (fragment, _) = parse_wdl(&content, Some(path)).unwrap();
    resolve_imports(fragment, path.parent().unwrap()).await.unwrap()
}

#[test]
fn test_parse_records_imports_without_following_them() {
    let wdl = r#"version 1.0

import "tasks/alignment.wdl" as align
import "tasks/qc.wdl" as qc
import "utils.wdl"

workflow pipeline {
  call align.bwa
}
"#;
    let (workflow, diagnostics) = parse_wdl(wdl, None).unwrap();
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);

    assert_eq!(workflow.version.as_deref(), Some("1.0"));
    let imports: Vec<(&str, &str)> = workflow
        .imports
        .iter()
        .map(|i| (i.path.as_str(), i.namespace.as_str()))
        .collect();
    assert_eq!(
        imports,
        vec![
            ("tasks/alignment.wdl", "align"),
            ("tasks/qc.wdl", "qc"),
            ("utils.wdl", "utils"),
        ]
    );
    assert!(workflow.tasks.is_empty());
    assert_eq!(workflow.calls[0].callee, "align.bwa");
    assert_eq!(workflow.calls[0].id, "bwa");
}

#[tokio::test]
async fn test_imported_task_is_merged_and_missing_file_is_reported() {
    let dir = fixture(&[("main.wdl", MAIN), ("lib/common.wdl", COMMON)]);
    let main = dir.path().join("main.wdl");

    let (workflow, diagnostics) = resolve_file(&main).await;
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    assert!(workflow.task("t").is_some());
    assert_eq!(workflow.calls[0].callee, "t");

    std::fs::remove_file(dir.path().join("lib/common.wdl")).unwrap();
    let (workflow, diagnostics) = resolve_file(&main).await;
    assert!(workflow.task("t").is_none());
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::MissingImport);
    assert!(diagnostics[0].is_error());
    assert!(diagnostics[0].message.contains("common.wdl"));

    let result = Converter::new()
        .convert_file(&main, &dir.path().join("main.cwl"))
        .await;
    match result {
        Err(ConvertError::Diagnostic(diagnostic)) => {
            assert!(diagnostic.message.contains("common.wdl"))
        }
        other => panic!("expected missing import, got {:?}", other.map(|c| c.text)),
    }
    assert!(!dir.path().join("main.cwl").exists());
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let dir = fixture(&[("main.wdl", MAIN), ("lib/common.wdl", COMMON)]);
    let main = dir.path().join("main.wdl");

    let (first, _) = resolve_file(&main).await;
    let (second, _) = resolve_file(&main).await;
    assert_eq!(first, second);
    assert_eq!(first.tasks.len(), 1);
}

#[tokio::test]
async fn test_diamond_import_is_parsed_once() {
    let top = r#"version 1.0
import "left.wdl" as left
import "right.wdl" as right
workflow top {
  call left.l
  call right.r
}
"#;
    let left = "version 1.0\nimport \"base.wdl\" as base\ntask l {\n  command <<< true >>>\n}\n";
    let right = "version 1.0\nimport \"base.wdl\" as base\ntask r {\n  command <<< true >>>\n}\n";
    let base = "version 1.0\ntask shared {\n  command <<< true >>>\n}\n";
    let dir = fixture(&[
        ("top.wdl", top),
        ("left.wdl", left),
        ("right.wdl", right),
        ("base.wdl", base),
    ]);
    let path = dir.path().join("top.wdl");
    let content = std::fs::read_to_string(&path).unwrap();
    let (fragment, _) = parse_wdl(&content, Some(&path)).unwrap();

    let cache = Arc::new(ImportCache::new());
    let resolver = ImportResolver::new(Arc::new(WdlParser)).with_cache(cache.clone());
    let (workflow, diagnostics) = resolver.resolve(fragment, dir.path()).await.unwrap();

    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    let mut names: Vec<&str> = workflow.tasks.iter().map(|t| t.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["l", "r", "shared"]);
    assert_eq!(cache.parse_count(), 3);
}

#[tokio::test]
async fn test_colliding_task_names_keep_first_definition() {
    let main = r#"version 1.0
import "a.wdl" as a
import "b.wdl" as b
workflow w {
  call a.t as first
  call b.t as second
}
"#;
    let a = "version 1.0\ntask t {\n  command <<< echo a >>>\n}\n";
    let b = "version 1.0\ntask t {\n  command <<< echo b >>>\n}\n";
    let dir = fixture(&[("main.wdl", main), ("a.wdl", a), ("b.wdl", b)]);

    let (workflow, diagnostics) = resolve_file(&dir.path().join("main.wdl")).await;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::ImportCollision);
    assert!(!diagnostics[0].is_error());

    assert!(workflow.task("t").unwrap().command.to_string().contains("echo a"));
    assert!(workflow.task("b.t").unwrap().command.to_string().contains("echo b"));
    assert_eq!(workflow.call("first").unwrap().callee, "t");
    assert_eq!(workflow.call("second").unwrap().callee, "b.t");
}

#[tokio::test]
async fn test_circular_import_is_a_diagnostic() {
    let a = "version 1.0\nimport \"b.wdl\" as b\ntask ta {\n  command <<< true >>>\n}\n";
    let b = "version 1.0\nimport \"a.wdl\" as a\ntask tb {\n  command <<< true >>>\n}\n";
    let dir = fixture(&[("a.wdl", a), ("b.wdl", b)]);

    let (workflow, diagnostics) = resolve_file(&dir.path().join("a.wdl")).await;
    assert!(workflow.task("tb").is_some());
    let circular: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::CircularImport)
        .collect();
    assert_eq!(circular.len(), 1);
    assert!(circular[0].is_error());
    assert!(circular[0].message.contains("a.wdl"));
}

#[tokio::test]
async fn test_import_depth_is_bounded() {
    let dir = fixture(&[
        ("l0.wdl", "version 1.0\nimport \"l1.wdl\"\n"),
        ("l1.wdl", "version 1.0\nimport \"l2.wdl\"\n"),
        ("l2.wdl", "version 1.0\nimport \"l3.wdl\"\n"),
        ("l3.wdl", "version 1.0\ntask deep {\n  command <<< true >>>\n}\n"),
    ]);
    let path = dir.path().join("l0.wdl");
    let content = std::fs::read_to_string(&path).unwrap();
    let (fragment, _) = parse_wdl(&content, Some(&path)).unwrap();

    let resolver = ImportResolver::new(Arc::new(WdlParser)).with_max_depth(2);
    let (workflow, diagnostics) = resolver.resolve(fragment, dir.path()).await.unwrap();
    assert!(workflow.task("deep").is_none());
    assert!(diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::ImportDepth && d.is_error()));
}

#[tokio::test]
async fn test_cancelled_resolution_stops() {
    let dir = fixture(&[("main.wdl", MAIN), ("lib/common.wdl", COMMON)]);
    let path = dir.path().join("main.wdl");
    let (fragment, _) = parse_wdl(MAIN, Some(&path)).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let resolver = ImportResolver::new(Arc::new(WdlParser)).with_cancellation(cancel);
    let result = resolver.resolve(fragment, dir.path()).await;
    assert!(matches!(result, Err(ConvertError::Cancelled)));
}
