pub mod cwl;
pub mod wdl;

pub use cwl::CwlWriter;
pub use wdl::WdlWriter;

use crate::diagnostic::{first_error, Diagnostic};
use crate::error::{ConvertError, Result};
use crate::ir::Workflow;
use crate::validation::validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Serialization for structured targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            other => Err(ConvertError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Yaml => f.write_str("yaml"),
            OutputFormat::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Write even when validation reported errors.
    pub best_effort: bool,
    /// Render string-keyed maps as `Any` instead of failing.
    pub degrade_maps: bool,
    /// Keep runtime keys without a native equivalent as namespaced hints.
    pub emit_runtime_hints: bool,
    pub format: OutputFormat,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            best_effort: false,
            degrade_maps: false,
            emit_runtime_hints: true,
            format: OutputFormat::Yaml,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteOutput {
    pub text: String,
    /// Warnings about degraded or dropped content.
    pub diagnostics: Vec<Diagnostic>,
}

/// IR to text for one target language.
pub trait TargetWriter: Send + Sync {
    fn name(&self) -> &'static str;

    /// File extensions this writer produces, preferred first.
    fn extensions(&self) -> &'static [&'static str];

    fn write(&self, workflow: &Workflow, options: &WriterOptions) -> Result<WriteOutput>;
}

/// Validate, then write. Output is refused while validation reports an
/// ERROR unless `best_effort` is set; validator diagnostics come first in
/// the returned list.
pub fn write_checked(
    writer: &dyn TargetWriter,
    workflow: &Workflow,
    options: &WriterOptions,
) -> Result<WriteOutput> {
    let (valid, mut diagnostics) = validate(workflow);
    if !valid {
        if let Some(error) = first_error(&diagnostics) {
            if !options.best_effort {
                return Err(error.clone().into());
            }
            warn!(workflow = %workflow.name, error = %error, "writing despite validation errors");
        }
    }
    let output = writer.write(workflow, options)?;
    diagnostics.extend(output.diagnostics);
    Ok(WriteOutput {
        text: output.text,
        diagnostics,
    })
}
