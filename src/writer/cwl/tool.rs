use super::js::{placeholder_js, to_js, JsScope};
use super::{default_value, escape_text, requirement, type_value, WriterOptions};
use crate::diagnostic::{Diagnostic, DiagnosticKind, Location};
use crate::error::{ConvertError, Result};
use crate::ir::runtime::{bytes_to_mib, disks_to_mib, memory_to_mib};
use crate::ir::{
    Binding, CommandPart, Expr, Input, Placeholder, RuntimeKey, StringPart, Task, TypeKind,
};
use serde_yaml::{Mapping, Value};
use std::cell::RefCell;

const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";

pub(super) struct BuiltTool {
    pub(super) document: Mapping,
    pub(super) diagnostics: Vec<Diagnostic>,
    /// Uses the `wdl:` namespace.
    pub(super) namespaced: bool,
}

/// Names inside a task: inputs read from `inputs`, private declarations
/// inlined.
struct TaskScope<'a> {
    task: &'a Task,
    visiting: RefCell<Vec<String>>,
}

fn input_js(input: &Input) -> String {
    let name = &input.name;
    match input.ty.kind() {
        TypeKind::File if input.ty.is_optional() => {
            format!("(inputs.{0} === null ? null : inputs.{0}.path)", name)
        }
        TypeKind::File => format!("inputs.{}.path", name),
        TypeKind::Array(item) if item.is_file() => format!(
            "inputs.{}.map(function(f) {{ return f === null ? null : f.path; }})",
            name
        ),
        _ => format!("inputs.{}", name),
    }
}

impl JsScope for TaskScope<'_> {
    fn reference(&self, root: &str, field: Option<&str>) -> std::result::Result<String, String> {
        if let Some(field) = field {
            return Err(format!("member access '{}.{}'", root, field));
        }
        if let Some(input) = self.task.input(root) {
            return Ok(input_js(input));
        }
        let Some(local) = self.task.local(root) else {
            return Err(format!("undeclared name '{}'", root));
        };
        if self.visiting.borrow().iter().any(|name| name == root) {
            return Err(format!("declaration '{}' refers to itself", root));
        }
        self.visiting.borrow_mut().push(root.to_string());
        let js = to_js(&local.expression, self);
        self.visiting.borrow_mut().pop();
        Ok(format!("({})", js?))
    }
}

/// Text of a scalar literal as it would be interpolated.
fn literal_text(expr: &Expr) -> Option<String> {
    match expr.literal_value()? {
        serde_json::Value::String(text) => Some(text),
        serde_json::Value::Null => Some(String::new()),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        other => Some(other.to_string()),
    }
}

struct ToolBuilder<'a> {
    task: &'a Task,
    options: &'a WriterOptions,
    scope: TaskScope<'a>,
    location: Location,
    diagnostics: Vec<Diagnostic>,
    needs_js: bool,
    stdout: bool,
    stderr: bool,
}

pub(super) fn build(task: &Task, options: &WriterOptions, id: Option<&str>) -> Result<BuiltTool> {
    ToolBuilder {
        task,
        options,
        scope: TaskScope {
            task,
            visiting: RefCell::new(Vec::new()),
        },
        location: task.location(),
        diagnostics: Vec::new(),
        needs_js: false,
        stdout: false,
        stderr: false,
    }
    .build(id)
}

impl<'a> ToolBuilder<'a> {
    fn unsupported(&self, construct: impl Into<String>) -> ConvertError {
        ConvertError::unsupported(self.location.clone(), construct)
    }

    fn drop_warning(&mut self, message: String) {
        self.diagnostics.push(Diagnostic::warning(
            DiagnosticKind::DroppedField,
            self.location.clone(),
            message,
        ));
    }

    /// A placeholder as a CWL parameter reference where one suffices,
    /// otherwise as a JavaScript expression.
    fn placeholder(&mut self, placeholder: &Placeholder) -> Result<String> {
        if placeholder.options.is_empty() {
            if let Expr::Ident(name) = &placeholder.expr {
                if let Some(input) = self.task.input(name) {
                    match input.ty.kind() {
                        _ if input.ty.is_optional() => {}
                        TypeKind::File => return Ok(format!("$(inputs.{}.path)", name)),
                        TypeKind::String | TypeKind::Int | TypeKind::Float | TypeKind::Boolean => {
                            return Ok(format!("$(inputs.{})", name))
                        }
                        _ => {}
                    }
                }
                if let Some(text) = self.task.local(name).and_then(|b| literal_text(&b.expression)) {
                    return Ok(escape_text(&text));
                }
            }
        }
        let js = placeholder_js(placeholder, &self.scope).map_err(|c| self.unsupported(c))?;
        self.needs_js = true;
        Ok(format!("$({})", js))
    }

    fn command(&mut self) -> Result<String> {
        let mut text = String::new();
        let task = self.task;
        for part in &task.command.parts {
            match part {
                CommandPart::Text(raw) => text.push_str(&escape_text(raw)),
                CommandPart::Placeholder(placeholder) => {
                    let rendered = self.placeholder(placeholder)?;
                    text.push_str(&rendered);
                }
            }
        }
        Ok(text)
    }

    /// A file name pattern: a string with interpolation, or a standard
    /// stream.
    fn pattern(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::String(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        StringPart::Text(raw) => text.push_str(&escape_text(raw)),
                        StringPart::Placeholder(placeholder) => {
                            let rendered = self.placeholder(placeholder)?;
                            text.push_str(&rendered);
                        }
                    }
                }
                Ok(text)
            }
            Expr::Apply { function, args } if args.is_empty() && function == "stdout" => {
                self.stdout = true;
                Ok(STDOUT_FILE.to_string())
            }
            Expr::Apply { function, args } if args.is_empty() && function == "stderr" => {
                self.stderr = true;
                Ok(STDERR_FILE.to_string())
            }
            Expr::Ident(name) => {
                let task = self.task;
                match task.local(name) {
                    Some(local) => self.pattern(&local.expression),
                    None => Err(self.unsupported(format!("output file '{}'", name))),
                }
            }
            other => Err(self.unsupported(format!("output file expression '{}'", other))),
        }
    }

    fn output(&mut self, output: &Binding) -> Result<Value> {
        let mut entry = Mapping::new();
        let scope = format!("output {}", output.name);
        let ty = type_value(
            &output.ty,
            &output.name,
            self.options,
            &self.location.clone().with_scope(scope),
            &mut self.diagnostics,
        )?;
        entry.insert("type".into(), ty);

        let mut binding = Mapping::new();
        match &output.expression {
            Expr::Apply { function, args } => match (function.as_str(), args.as_slice()) {
                ("stdout", []) | ("stderr", []) => {
                    let file = self.pattern(&output.expression)?;
                    binding.insert("glob".into(), file.into());
                }
                ("glob", [pattern]) => {
                    let pattern = self.pattern(pattern)?;
                    binding.insert("glob".into(), pattern.into());
                }
                (read, [file]) if read.starts_with("read_") => {
                    let eval = match read {
                        "read_string" => "$(self[0].contents.replace(/\\n$/, \"\"))",
                        "read_int" => "$(parseInt(self[0].contents))",
                        "read_float" => "$(parseFloat(self[0].contents))",
                        "read_boolean" => "$(self[0].contents.trim().toLowerCase() === \"true\")",
                        "read_lines" => {
                            "$(self[0].contents.split(\"\\n\").filter(function(l) { return l.length > 0; }))"
                        }
                        _ => return Err(self.unsupported(format!("output function '{}'", read))),
                    };
                    let file = self.pattern(file)?;
                    binding.insert("glob".into(), file.into());
                    binding.insert("loadContents".into(), true.into());
                    binding.insert("outputEval".into(), eval.into());
                    self.needs_js = true;
                }
                _ => {
                    return Err(self.unsupported(format!(
                        "output expression '{}'",
                        output.expression
                    )))
                }
            },
            Expr::String(_) => {
                let pattern = self.pattern(&output.expression)?;
                binding.insert("glob".into(), pattern.into());
            }
            Expr::Ident(name) if self.task.input(name).is_some() => {
                binding.insert("outputEval".into(), format!("$(inputs.{})", name).into());
            }
            Expr::Ident(name) if self.task.local(name).is_some() => {
                let pattern = self.pattern(&output.expression)?;
                binding.insert("glob".into(), pattern.into());
            }
            other => {
                return Err(self.unsupported(format!("output expression '{}'", other)));
            }
        }
        entry.insert("outputBinding".into(), Value::Mapping(binding));
        Ok(Value::Mapping(entry))
    }

    fn input(&mut self, input: &Input) -> Result<Value> {
        let location = self.location.clone().with_scope(format!("input {}", input.name));
        let mut entry = Mapping::new();
        let ty = type_value(&input.ty, &input.name, self.options, &location, &mut self.diagnostics)?;
        entry.insert("type".into(), ty);
        if let Some(default) = &input.default {
            entry.insert(
                "default".into(),
                default_value(&input.ty, default, &input.name, &location)?,
            );
        }
        Ok(Value::Mapping(entry))
    }

    /// Numeric runtime value: a literal, a numeric string, or an expression.
    fn numeric(&mut self, expr: &Expr) -> Option<Value> {
        if let Some(value) = expr.literal_value() {
            return match value {
                serde_json::Value::Number(n) if n.as_f64().is_some_and(|x| x > 0.0) => {
                    serde_yaml::to_value(n).ok()
                }
                serde_json::Value::String(s) => s
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|&n| n > 0)
                    .map(Value::from),
                _ => None,
            };
        }
        let js = to_js(expr, &self.scope).ok()?;
        self.needs_js = true;
        Some(Value::from(format!("$({})", js)))
    }

    /// Runtime through the fixed mapping: container, cpu, memory, disks and
    /// return codes have CWL fields; everything else is a hint or dropped.
    fn runtime(&mut self, requirements: &mut Vec<Value>, hints: &mut Mapping, tool: &mut Mapping) {
        let task = self.task;
        let Some(runtime) = task.runtime.as_ref() else {
            return;
        };
        let mut resources = requirement("ResourceRequirement");
        let mut leftovers: Vec<(String, &Expr)> = Vec::new();

        for (key, value) in &runtime.settings {
            match key {
                RuntimeKey::Container => match value.as_plain_string() {
                    Some(image) => {
                        let mut docker = requirement("DockerRequirement");
                        docker.insert("dockerPull".into(), image.into());
                        requirements.push(Value::Mapping(docker));
                    }
                    None => self.drop_warning(format!(
                        "container '{}' is not a fixed image name and was dropped",
                        value
                    )),
                },
                RuntimeKey::Cpu => match self.numeric(value) {
                    Some(cores) => {
                        resources.insert("coresMin".into(), cores);
                    }
                    None => self.drop_warning(format!("cpu '{}' was dropped", value)),
                },
                RuntimeKey::Memory => {
                    let mib = match value.literal_value() {
                        Some(serde_json::Value::String(text)) => memory_to_mib(&text),
                        Some(serde_json::Value::Number(n)) => {
                            n.as_u64().and_then(|bytes| bytes_to_mib(bytes as f64))
                        }
                        _ => None,
                    };
                    match mib {
                        Some(mib) => {
                            resources.insert("ramMin".into(), mib.into());
                        }
                        None => self.drop_warning(format!("memory '{}' was dropped", value)),
                    }
                }
                RuntimeKey::Disks => {
                    let mib = match value.literal_value() {
                        Some(serde_json::Value::String(text)) => disks_to_mib(&text),
                        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|gib| gib.checked_mul(1024)),
                        _ => None,
                    };
                    match mib {
                        Some(mib) => {
                            resources.insert("outdirMin".into(), mib.into());
                        }
                        None => self.drop_warning(format!("disks '{}' was dropped", value)),
                    }
                }
                RuntimeKey::ReturnCodes => match value.literal_value() {
                    Some(serde_json::Value::Number(code)) => {
                        let codes = serde_yaml::to_value(vec![code]).unwrap_or(Value::Null);
                        tool.insert("successCodes".into(), codes);
                    }
                    Some(serde_json::Value::Array(codes))
                        if codes.iter().all(serde_json::Value::is_i64) =>
                    {
                        let codes = serde_yaml::to_value(codes).unwrap_or(Value::Null);
                        tool.insert("successCodes".into(), codes);
                    }
                    _ => leftovers.push((key.name().to_string(), value)),
                },
                RuntimeKey::Gpu
                | RuntimeKey::Preemptible
                | RuntimeKey::MaxRetries
                | RuntimeKey::Zones
                | RuntimeKey::BootDiskSizeGb => leftovers.push((key.name().to_string(), value)),
            }
        }
        for (key, value) in &runtime.extensions {
            leftovers.push((key.clone(), value));
        }

        if resources.len() > 1 {
            requirements.push(Value::Mapping(resources));
        }

        for (key, value) in leftovers {
            if self.options.emit_runtime_hints {
                let hint = match value.literal_value() {
                    Some(literal) => serde_yaml::to_value(literal).unwrap_or(Value::Null),
                    None => Value::from(value.to_string()),
                };
                hints.insert(key.into(), hint);
            } else {
                self.drop_warning(format!(
                    "runtime key '{}' has no CWL equivalent and was dropped",
                    key
                ));
            }
        }
    }

    fn build(mut self, id: Option<&str>) -> Result<BuiltTool> {
        let task = self.task;
        let mut tool = Mapping::new();
        tool.insert("class".into(), "CommandLineTool".into());
        if let Some(id) = id {
            tool.insert("id".into(), id.into());
        }
        if let Some(description) = task.meta.get("description") {
            tool.insert("doc".into(), description.as_str().into());
        }

        let mut inputs = Mapping::new();
        for input in &task.inputs {
            let value = self.input(input)?;
            inputs.insert(input.name.as_str().into(), value);
        }
        let mut outputs = Mapping::new();
        for output in &task.outputs {
            let value = self.output(output)?;
            outputs.insert(output.name.as_str().into(), value);
        }
        let command = self.command()?;

        let mut requirements = Vec::new();
        let mut runtime_hints = requirement("wdl:RuntimeHints");
        let mut extra = Mapping::new();
        self.runtime(&mut requirements, &mut runtime_hints, &mut extra);
        if self.needs_js {
            requirements.insert(0, Value::Mapping(requirement("InlineJavascriptRequirement")));
        }
        let namespaced = runtime_hints.len() > 1;

        if !requirements.is_empty() {
            tool.insert("requirements".into(), Value::Sequence(requirements));
        }
        if namespaced {
            tool.insert(
                "hints".into(),
                Value::Sequence(vec![Value::Mapping(runtime_hints)]),
            );
        }
        tool.insert(
            "baseCommand".into(),
            Value::Sequence(vec!["bash".into(), "-c".into()]),
        );
        tool.insert("arguments".into(), Value::Sequence(vec![command.into()]));
        if self.stdout {
            tool.insert("stdout".into(), STDOUT_FILE.into());
        }
        if self.stderr {
            tool.insert("stderr".into(), STDERR_FILE.into());
        }
        tool.extend(extra);
        tool.insert("inputs".into(), Value::Mapping(inputs));
        tool.insert("outputs".into(), Value::Mapping(outputs));

        Ok(BuiltTool {
            document: tool,
            diagnostics: self.diagnostics,
            namespaced,
        })
    }
}
