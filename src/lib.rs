pub mod cache;
pub mod config;
pub mod convert;
pub mod diagnostic;
pub mod error;
pub mod format;
pub mod graph;
pub mod ir;
pub mod parser;
pub mod validation;
pub mod writer;

pub use cache::ImportCache;
pub use config::Config;
pub use convert::{AnalysisReport, BatchOptions, BatchReport, Conversion, Converter, FileOutcome};
pub use diagnostic::{Diagnostic, DiagnosticKind, Location, Severity};
pub use error::{ConvertError, Result};
pub use format::FormatRegistry;
pub use graph::DependencyGraph;
pub use ir::{TypeSpec, Workflow};
pub use parser::import_resolver::resolve_imports;
pub use parser::{parse_wdl, ImportResolver, ParseOptions, SourceParser, WdlParser};
pub use validation::validate;
pub use writer::{write_checked, CwlWriter, OutputFormat, TargetWriter, WdlWriter, WriterOptions};
