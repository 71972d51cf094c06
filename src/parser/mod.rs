pub mod ast;
pub mod import_resolver;
mod lower;
pub mod wdl_parser;

pub use import_resolver::ImportResolver;

use crate::diagnostic::{first_error, Diagnostic};
use crate::error::Result;
use crate::ir::Workflow;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Abort on the first ERROR diagnostic instead of recovering.
    pub fail_fast: bool,
}

/// Text to IR for one source language.
pub trait SourceParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// File extensions this parser claims, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Parse one document into an unresolved workflow fragment. Imports are
    /// recorded, not followed.
    fn parse_text(
        &self,
        content: &str,
        origin: Option<&Path>,
        options: &ParseOptions,
    ) -> Result<(Workflow, Vec<Diagnostic>)>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WdlParser;

impl SourceParser for WdlParser {
    fn name(&self) -> &'static str {
        "wdl"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["wdl"]
    }

    fn parse_text(
        &self,
        content: &str,
        origin: Option<&Path>,
        options: &ParseOptions,
    ) -> Result<(Workflow, Vec<Diagnostic>)> {
        let (document, syntax_errors) = wdl_parser::parse_document(content);
        let (workflow, diagnostics) =
            lower::Lowering::new(content, origin).lower(document, syntax_errors);
        if options.fail_fast {
            if let Some(diagnostic) = first_error(&diagnostics) {
                return Err(diagnostic.clone().into());
            }
        }
        Ok((workflow, diagnostics))
    }
}

/// Parse WDL text with error recovery.
pub fn parse_wdl(content: &str, origin: Option<&Path>) -> Result<(Workflow, Vec<Diagnostic>)> {
    WdlParser.parse_text(content, origin, &ParseOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticKind;
    use crate::error::ConvertError;
    use crate::ir::{Expr, TypeSpec, WorkflowKind};
    use std::path::PathBuf;

    const GENOMIC: &str = r#"
version 1.0

import "lib/qc.wdl" as qc

workflow GenomicAnalysis {
  input {
    Array[File] samples
    String sample_id
    Int quality_threshold = 30
  }

  scatter (fastq in samples) {
    call qc.QualityControl {
      input:
        fastq_file = fastq,
        threshold = quality_threshold
    }
  }

  call CountReads as count { input: fastq_files = samples }

  output {
    Array[File] qc_reports = QualityControl.report
    Int total_reads = count.count
  }
}

task CountReads {
  input {
    Array[File] fastq_files
  }

  command <<<
    cat ~{sep=" " fastq_files} | wc -l > read_count.txt
  >>>

  output {
    Int count = read_int("read_count.txt")
  }

  runtime {
    docker: "ubuntu:22.04"
    preemptible: 3
  }
}
"#;

    #[test]
    fn test_parse_genomic_workflow() {
        let origin = PathBuf::from("pipelines/genomic.wdl");
        let (workflow, diagnostics) = parse_wdl(GENOMIC, Some(&origin)).unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        assert_eq!(workflow.name, "GenomicAnalysis");
        assert_eq!(workflow.kind, WorkflowKind::Workflow);
        assert_eq!(workflow.version.as_deref(), Some("1.0"));
        assert_eq!(workflow.imports.len(), 1);
        assert_eq!(workflow.imports[0].namespace, "qc");
        assert_eq!(workflow.inputs.len(), 3);
        assert_eq!(workflow.outputs.len(), 2);
        assert_eq!(workflow.tasks.len(), 1);

        let scattered = workflow.call("QualityControl").unwrap();
        assert_eq!(scattered.callee, "qc.QualityControl");
        let scatter = scattered.scatter.as_ref().unwrap();
        assert_eq!(scatter.variable, "fastq");
        assert_eq!(scatter.collection, Expr::ident("samples"));

        let count = workflow.call("count").unwrap();
        assert_eq!(count.callee, "CountReads");
        assert!(count.scatter.is_none());
        assert_eq!(count.line, Some(21));

        let task = workflow.task("CountReads").unwrap();
        assert_eq!(task.origin.as_deref(), Some(origin.as_path()));
        assert_eq!(task.inputs[0].ty, TypeSpec::array(TypeSpec::file()));
        let runtime = task.runtime.as_ref().unwrap();
        assert!(runtime.container().is_some());
        assert!(runtime.extensions.is_empty());
    }

    #[test]
    fn test_unresolved_command_reference_omits_task() {
        let source = r#"
task good {
  input { String name }
  command <<< echo ~{name} >>>
}

task bad {
  input { String name }
  command <<< echo ~{nmae} >>>
}
"#;
        let (workflow, diagnostics) = parse_wdl(source, None).unwrap();
        assert!(workflow.is_library());
        assert_eq!(workflow.tasks.len(), 1);
        assert_eq!(workflow.tasks[0].name, "good");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Reference);
        assert!(diagnostics[0].message.contains("nmae"));
        assert_eq!(diagnostics[0].location.scope.as_deref(), Some("task bad"));
        assert_eq!(diagnostics[0].location.line, Some(9));
    }

    #[test]
    fn test_fail_fast_returns_first_error() {
        let source = "task bad {\n  command <<< echo ~{missing} >>>\n}\n";
        let options = ParseOptions { fail_fast: true };
        match WdlParser.parse_text(source, None, &options) {
            Err(ConvertError::Reference { message, .. }) => assert!(message.contains("missing")),
            other => panic!("expected reference error, got {:?}", other),
        }
    }

    #[test]
    fn test_private_declaration_resolves_in_command() {
        let source = r#"
task sort_bam {
  input { File bam }
  String prefix = basename(bam, ".bam")
  command <<< samtools sort ~{bam} -o ~{prefix}.sorted.bam >>>
  output { File sorted = "~{prefix}.sorted.bam" }
}
"#;
        let (workflow, diagnostics) = parse_wdl(source, Some(Path::new("sort_bam.wdl"))).unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(workflow.name, "sort_bam");
        assert_eq!(workflow.tasks[0].locals.len(), 1);
    }

    #[test]
    fn test_declaration_after_command_is_in_scope() {
        let source = r#"
task t {
  input { File reads }
  command <<< gzip -c ~{reads} > ~{out_name} >>>
  String out_name = basename(reads) + ".gz"
  output { File zipped = out_name }
}
"#;
        let (workflow, diagnostics) = parse_wdl(source, None).unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(workflow.tasks[0].locals[0].name, "out_name");

        let undeclared = source.replace("  String out_name = basename(reads) + \".gz\"\n", "");
        let (workflow, diagnostics) = parse_wdl(&undeclared, None).unwrap();
        assert!(workflow.tasks.is_empty());
        assert!(diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::Reference && d.message.contains("out_name")));
    }

    #[test]
    fn test_unknown_type_is_a_type_error() {
        let source = "task t {\n  input { Pair[Int, Int] p }\n  command <<< true >>>\n}\n";
        let (workflow, diagnostics) = parse_wdl(source, None).unwrap();
        assert!(workflow.tasks.is_empty());
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Type);
    }

    #[test]
    fn test_non_empty_qualifier_is_a_warning() {
        let source = "task t {\n  input { Array[File]+ xs }\n  command <<< cat ~{sep=' ' xs} >>>\n}\n";
        let (workflow, diagnostics) = parse_wdl(source, None).unwrap();
        assert_eq!(workflow.tasks.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::DroppedField);
        assert!(!diagnostics[0].is_error());
    }

    #[test]
    fn test_unsupported_workflow_constructs() {
        let source = r#"
struct Sample { String id }

workflow w {
  input { Array[Array[File]] groups  Boolean run }
  scatter (group in groups) {
    scatter (f in group) {
      call t { input: f = f }
    }
  }
  if (run) {
    call t as maybe
  }
}

task t {
  input { File? f }
  command <<< true >>>
}
"#;
        let (workflow, diagnostics) = parse_wdl(source, None).unwrap();
        let unsupported: Vec<_> = diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::UnsupportedConstruct)
            .collect();
        assert_eq!(unsupported.len(), 3, "{:?}", diagnostics);
        assert!(workflow.calls.is_empty());
        assert_eq!(workflow.tasks.len(), 1);
    }

    #[test]
    fn test_empty_document_is_an_error() {
        let (_, diagnostics) = parse_wdl("version 1.0\n# nothing here\n", None).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("no tasks or workflows"));
    }
}
