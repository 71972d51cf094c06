use super::{TargetWriter, WriteOutput, WriterOptions};
use crate::error::{ConvertError, Result};
use crate::ir::{Binding, Call, Input, Scatter, Task, Workflow};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Writes IR back out as a single WDL 1.0 document.
#[derive(Debug, Clone, Copy, Default)]
pub struct WdlWriter;

impl TargetWriter for WdlWriter {
    fn name(&self) -> &'static str {
        "wdl"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["wdl"]
    }

    fn write(&self, workflow: &Workflow, _options: &WriterOptions) -> Result<WriteOutput> {
        if let Some(sub) = workflow.subworkflows.first() {
            return Err(ConvertError::unsupported(
                sub.location(),
                format!(
                    "sub-workflow '{}' cannot share a WDL document with '{}'",
                    sub.name, workflow.name
                ),
            ));
        }

        let mut out = String::new();
        writeln!(&mut out, "version 1.0").unwrap_or(());

        if !workflow.is_library() {
            writeln!(&mut out).unwrap_or(());
            write_workflow(&mut out, workflow);
        }
        for task in workflow.sorted_tasks() {
            writeln!(&mut out).unwrap_or(());
            write_task(&mut out, task);
        }

        Ok(WriteOutput {
            text: out,
            diagnostics: Vec::new(),
        })
    }
}

/// Renamed colliding imports carry a namespace dot that WDL identifiers
/// cannot hold.
fn wdl_name(name: &str) -> String {
    name.replace('.', "_")
}

fn quoted(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn write_meta(out: &mut String, meta: &BTreeMap<String, String>) {
    if meta.is_empty() {
        return;
    }
    writeln!(out, "  meta {{").unwrap_or(());
    for (key, value) in meta {
        writeln!(out, "    {}: {}", key, quoted(value)).unwrap_or(());
    }
    writeln!(out, "  }}").unwrap_or(());
    writeln!(out).unwrap_or(());
}

fn write_inputs(out: &mut String, inputs: &[Input]) {
    if inputs.is_empty() {
        return;
    }
    writeln!(out, "  input {{").unwrap_or(());
    for input in inputs {
        match &input.default {
            Some(default) => writeln!(out, "    {} {} = {}", input.ty, input.name, default),
            None => writeln!(out, "    {} {}", input.ty, input.name),
        }
        .unwrap_or(());
    }
    writeln!(out, "  }}").unwrap_or(());
    writeln!(out).unwrap_or(());
}

fn write_bindings(out: &mut String, bindings: &[Binding]) {
    for binding in bindings {
        writeln!(out, "  {} {} = {}", binding.ty, binding.name, binding.expression).unwrap_or(());
    }
    if !bindings.is_empty() {
        writeln!(out).unwrap_or(());
    }
}

fn write_outputs(out: &mut String, outputs: &[Binding]) {
    if outputs.is_empty() {
        return;
    }
    writeln!(out, "  output {{").unwrap_or(());
    for output in outputs {
        writeln!(out, "    {} {} = {}", output.ty, output.name, output.expression).unwrap_or(());
    }
    writeln!(out, "  }}").unwrap_or(());
}

fn write_call(out: &mut String, call: &Call, indent: &str) {
    let callee = wdl_name(&call.callee);
    if callee == call.id {
        write!(out, "{}call {}", indent, callee).unwrap_or(());
    } else {
        write!(out, "{}call {} as {}", indent, callee, call.id).unwrap_or(());
    }
    if call.inputs.is_empty() {
        writeln!(out).unwrap_or(());
        return;
    }
    writeln!(out, " {{").unwrap_or(());
    writeln!(out, "{}  input:", indent).unwrap_or(());
    let last = call.inputs.len() - 1;
    for (i, (name, expr)) in call.inputs.iter().enumerate() {
        let comma = if i < last { "," } else { "" };
        writeln!(out, "{}    {} = {}{}", indent, name, expr, comma).unwrap_or(());
    }
    writeln!(out, "{}}}", indent).unwrap_or(());
}

/// Calls sharing a scatter are grouped into one block at the position of
/// the first of them.
fn write_workflow(out: &mut String, workflow: &Workflow) {
    writeln!(out, "workflow {} {{", workflow.name).unwrap_or(());
    write_meta(out, &workflow.meta);
    write_inputs(out, &workflow.inputs);
    write_bindings(out, &workflow.bindings);

    let mut groups: Vec<(Option<&Scatter>, Vec<&Call>)> = Vec::new();
    for call in &workflow.calls {
        let scatter = call.scatter.as_ref();
        match groups
            .iter_mut()
            .find(|(s, _)| scatter.is_some() && *s == scatter)
        {
            Some((_, calls)) => calls.push(call),
            None => groups.push((scatter, vec![call])),
        }
    }

    for (scatter, calls) in groups {
        match scatter {
            Some(scatter) => {
                writeln!(
                    out,
                    "  scatter ({} in {}) {{",
                    scatter.variable, scatter.collection
                )
                .unwrap_or(());
                for call in calls {
                    write_call(out, call, "    ");
                }
                writeln!(out, "  }}").unwrap_or(());
            }
            None => {
                for call in calls {
                    write_call(out, call, "  ");
                }
            }
        }
        writeln!(out).unwrap_or(());
    }

    write_outputs(out, &workflow.outputs);
    writeln!(out, "}}").unwrap_or(());
}

fn write_task(out: &mut String, task: &Task) {
    writeln!(out, "task {} {{", wdl_name(&task.name)).unwrap_or(());
    write_meta(out, &task.meta);
    write_inputs(out, &task.inputs);
    write_bindings(out, &task.locals);

    writeln!(out, "  command <<<").unwrap_or(());
    for line in task.command.to_string().lines() {
        if line.is_empty() {
            writeln!(out).unwrap_or(());
        } else {
            writeln!(out, "    {}", line).unwrap_or(());
        }
    }
    writeln!(out, "  >>>").unwrap_or(());

    if !task.outputs.is_empty() {
        writeln!(out).unwrap_or(());
        write_outputs(out, &task.outputs);
    }

    if let Some(runtime) = &task.runtime {
        writeln!(out).unwrap_or(());
        writeln!(out, "  runtime {{").unwrap_or(());
        for (key, value) in &runtime.settings {
            writeln!(out, "    {}: {}", key.name(), value).unwrap_or(());
        }
        for (key, value) in &runtime.extensions {
            writeln!(out, "    {}: {}", key, value).unwrap_or(());
        }
        writeln!(out, "  }}").unwrap_or(());
    }
    writeln!(out, "}}").unwrap_or(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_wdl;

    const SOURCE: &str = r#"
version 1.0

workflow pipeline {
  meta { description: "align then merge" }
  input { Array[File] samples }

  scatter (s in samples) {
    call align { input: fastq = s }
  }
  call merge as merged { input: bams = align.bam }
  scatter (s in samples) {
    call stats { input: fastq = s }
  }

  output { File final = merged.out }
}

task align {
  input { File fastq  Int threads = 4 }
  command <<<
    bwa mem -t ~{threads} ~{fastq} > out.bam
  >>>
  output { File bam = "out.bam" }
  runtime { docker: "bwa:0.7" preemptible: 2 }
}

task merge {
  input { Array[File] bams }
  command <<< samtools merge out.bam ~{sep=" " bams} >>>
  output { File out = "out.bam" }
}

task stats {
  input { File fastq }
  command <<< wc -l ~{fastq} >>>
}
"#;

    #[test]
    fn test_written_wdl_parses_back_to_same_ir() {
        let (workflow, diagnostics) = parse_wdl(SOURCE, None).unwrap();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        let text = WdlWriter
            .write(&workflow, &WriterOptions::default())
            .unwrap()
            .text;
        let (reparsed, diagnostics) = parse_wdl(&text, None).unwrap();
        assert!(diagnostics.is_empty(), "{:?}\n{}", diagnostics, text);

        assert_eq!(reparsed.name, workflow.name);
        assert_eq!(reparsed.inputs, workflow.inputs);
        assert_eq!(reparsed.outputs, workflow.outputs);
        assert_eq!(reparsed.meta, workflow.meta);
        assert_eq!(reparsed.tasks.len(), 3);
        for task in &workflow.tasks {
            let again = reparsed.task(&task.name).unwrap();
            assert_eq!(again.inputs, task.inputs);
            assert_eq!(again.outputs, task.outputs);
            assert_eq!(again.command, task.command);
            assert_eq!(again.runtime, task.runtime);
        }
        for call in &workflow.calls {
            let again = reparsed.call(&call.id).unwrap();
            assert_eq!(again.callee, call.callee);
            assert_eq!(again.inputs, call.inputs);
            assert_eq!(again.scatter, call.scatter);
        }
    }

    #[test]
    fn test_scatters_are_grouped_and_tasks_sorted() {
        let (workflow, _) = parse_wdl(SOURCE, None).unwrap();
        let text = WdlWriter
            .write(&workflow, &WriterOptions::default())
            .unwrap()
            .text;
        assert_eq!(text.matches("scatter (s in samples)").count(), 1);
        let align = text.find("task align").unwrap();
        let merge = text.find("task merge").unwrap();
        let stats = text.find("task stats").unwrap();
        assert!(align < merge && merge < stats);
        assert!(text.contains("call merge as merged {"));
    }

    #[test]
    fn test_separate_blocks_with_same_header_stay_separate() {
        let source = r#"version 1.0
workflow w {
  input {
    Array[File] xs
  }
  scatter (s in xs) {
    call a { input: f = s }
  }
  scatter (s in xs) {
    call b { input: all = a.out, f = s }
  }
}
task a {
  input { File f }
  command <<< cat ~{f} >>>
  output { File out = stdout() }
}
task b {
  input { Array[File] all  File f }
  command <<< cat ~{f} >>>
}
"#;
        let (workflow, _) = parse_wdl(source, None).unwrap();
        let text = WdlWriter
            .write(&workflow, &WriterOptions::default())
            .unwrap()
            .text;
        assert_eq!(text.matches("scatter (s in xs)").count(), 2);

        let (reparsed, _) = parse_wdl(&text, None).unwrap();
        let a = reparsed.call("a").unwrap().scatter.as_ref();
        let b = reparsed.call("b").unwrap().scatter.as_ref();
        assert!(a.is_some() && b.is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn test_subworkflows_are_unsupported() {
        let mut workflow = Workflow::new("outer");
        workflow.subworkflows.push(Workflow::new("inner"));
        assert!(matches!(
            WdlWriter.write(&workflow, &WriterOptions::default()),
            Err(ConvertError::UnsupportedConstruct { .. })
        ));
    }
}
