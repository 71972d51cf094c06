//! CWL v1.2 output.
//!
//! A library holding one task becomes a bare `CommandLineTool`. Anything
//! else is a packed document: a `$graph` of tools (alphabetical), then
//! sub-workflows (alphabetical), then the workflow itself as `#main`.

mod js;
mod tool;
mod workflow;

use super::{OutputFormat, TargetWriter, WriteOutput, WriterOptions};
use crate::diagnostic::{Diagnostic, DiagnosticKind, Location};
use crate::error::{ConvertError, Result};
use crate::ir::types::cwl_type_value;
use crate::ir::{Expr, TypeKind, TypeSpec, Workflow};
use serde_yaml::{Mapping, Value};
use tracing::debug;

pub const CWL_VERSION: &str = "v1.2";
/// Namespace for runtime keys CWL has no field for.
pub const WDL_NAMESPACE: &str = "https://openwdl.org/cwl#";

#[derive(Debug, Clone, Copy, Default)]
pub struct CwlWriter;

impl TargetWriter for CwlWriter {
    fn name(&self) -> &'static str {
        "cwl"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["cwl", "json"]
    }

    fn write(&self, workflow: &Workflow, options: &WriterOptions) -> Result<WriteOutput> {
        let mut diagnostics = Vec::new();
        let mut namespaced = false;
        let tasks = workflow.sorted_tasks();

        let mut document = Mapping::new();
        document.insert("cwlVersion".into(), CWL_VERSION.into());

        let body = if workflow.is_library() && tasks.len() == 1 {
            let tool = tool::build(tasks[0], options, None)?;
            diagnostics.extend(tool.diagnostics);
            namespaced |= tool.namespaced;
            tool.document
        } else {
            let mut graph = Vec::new();
            for task in &tasks {
                let tool = tool::build(task, options, Some(&format!("#{}", task.name)))?;
                diagnostics.extend(tool.diagnostics);
                namespaced |= tool.namespaced;
                graph.push(Value::Mapping(tool.document));
            }
            for sub in workflow.sorted_subworkflows() {
                let built = workflow::build(workflow, sub, options, &format!("#{}", sub.name))?;
                diagnostics.extend(built.diagnostics);
                graph.push(Value::Mapping(built.document));
            }
            if !workflow.is_library() {
                let built = workflow::build(workflow, workflow, options, "#main")?;
                diagnostics.extend(built.diagnostics);
                graph.push(Value::Mapping(built.document));
            }
            let mut packed = Mapping::new();
            packed.insert("$graph".into(), Value::Sequence(graph));
            packed
        };

        if namespaced {
            let mut namespaces = Mapping::new();
            namespaces.insert("wdl".into(), WDL_NAMESPACE.into());
            document.insert("$namespaces".into(), Value::Mapping(namespaces));
        }
        document.extend(body);

        debug!(workflow = %workflow.name, tasks = tasks.len(), "rendered CWL document");
        Ok(WriteOutput {
            text: serialize(&Value::Mapping(document), options.format)?,
            diagnostics,
        })
    }
}

pub(crate) fn serialize(value: &Value, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        OutputFormat::Json => {
            let mut text = serde_json::to_string_pretty(value)?;
            text.push('\n');
            Ok(text)
        }
    }
}

fn requirement(class: &str) -> Mapping {
    let mut entry = Mapping::new();
    entry.insert("class".into(), class.into());
    entry
}

/// Shell text as a CWL string: backslashes doubled, `$(` and `${` escaped
/// so only generated references are evaluated.
fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace("$(", "\\$(")
        .replace("${", "\\${")
}

fn degraded_type(spec: &TypeSpec) -> Result<Value> {
    let base = match spec.kind() {
        TypeKind::Map(key, _) if matches!(key.kind(), TypeKind::String) => Value::from("Any"),
        TypeKind::Array(item) => {
            let mut array = Mapping::new();
            array.insert("type".into(), "array".into());
            array.insert("items".into(), degraded_type(item)?);
            Value::Mapping(array)
        }
        _ => return cwl_type_value(spec),
    };
    Ok(if spec.is_optional() {
        Value::Sequence(vec![Value::from("null"), base])
    } else {
        base
    })
}

fn contains_map(spec: &TypeSpec) -> bool {
    match spec.kind() {
        TypeKind::Map(_, _) => true,
        TypeKind::Array(item) => contains_map(item),
        _ => false,
    }
}

/// CWL type for a declaration. String-keyed maps degrade to `Any` only when
/// the options allow it, with a warning.
fn type_value(
    spec: &TypeSpec,
    name: &str,
    options: &WriterOptions,
    location: &Location,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Value> {
    match cwl_type_value(spec) {
        Err(ConvertError::UnsupportedType { .. }) if options.degrade_maps && contains_map(spec) => {
            let degraded = degraded_type(spec)?;
            diagnostics.push(Diagnostic::warning(
                DiagnosticKind::UnsupportedType,
                location.clone(),
                format!("'{}' of type {} is written as Any", name, spec),
            ));
            Ok(degraded)
        }
        other => other,
    }
}

fn file_object(path: &str) -> Value {
    let mut file = Mapping::new();
    file.insert("class".into(), "File".into());
    file.insert("location".into(), path.into());
    Value::Mapping(file)
}

/// A literal as a CWL value; strings become File objects where the type
/// asks for files.
fn literal_value(spec: &TypeSpec, value: serde_json::Value) -> Result<Value> {
    match (spec.kind(), value) {
        (TypeKind::File, serde_json::Value::String(path)) => Ok(file_object(&path)),
        (TypeKind::Array(item), serde_json::Value::Array(items)) => Ok(Value::Sequence(
            items
                .into_iter()
                .map(|v| literal_value(item, v))
                .collect::<Result<_>>()?,
        )),
        (_, value) => Ok(serde_yaml::to_value(value)?),
    }
}

fn default_value(spec: &TypeSpec, expr: &Expr, name: &str, location: &Location) -> Result<Value> {
    match expr.literal_value() {
        Some(value) => literal_value(spec, value),
        None => Err(ConvertError::unsupported(
            location.clone(),
            format!("default '{}' for '{}' is not a literal", expr, name),
        )),
    }
}
