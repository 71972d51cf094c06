//! Single-unit conversion pipeline: parse, resolve imports, validate, write.

pub mod batch;

pub use batch::{BatchOptions, BatchReport, FileOutcome};

use crate::cache::ImportCache;
use crate::config::Config;
use crate::diagnostic::{first_error, Diagnostic};
use crate::error::{ConvertError, Result};
use crate::format::FormatRegistry;
use crate::graph::DependencyGraph;
use crate::ir::Workflow;
use crate::parser::import_resolver::DEFAULT_MAX_DEPTH;
use crate::parser::{ImportResolver, ParseOptions, SourceParser};
use crate::validation::validate;
use crate::writer::{write_checked, OutputFormat, TargetWriter, WriterOptions};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Text produced by one conversion and everything reported along the way.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl Conversion {
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }
}

/// Graph facts about one workflow, as printed by `analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub workflow: String,
    pub task_count: usize,
    pub call_count: usize,
    pub has_cycles: bool,
    /// Nodes of one cycle, first node repeated at the end.
    pub cycle: Option<Vec<String>>,
    pub topological_order: Option<Vec<String>>,
    pub levels: Option<Vec<Vec<String>>>,
    pub max_parallelism: Option<usize>,
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip)]
    pub dot: String,
}

#[derive(Clone)]
pub struct Converter {
    registry: FormatRegistry,
    cache: Arc<ImportCache>,
    parse_options: ParseOptions,
    writer_options: WriterOptions,
    cancel: CancellationToken,
    max_import_depth: usize,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    pub fn new() -> Self {
        Self {
            registry: FormatRegistry::default(),
            cache: Arc::new(ImportCache::new()),
            parse_options: ParseOptions::default(),
            writer_options: WriterOptions::default(),
            cancel: CancellationToken::new(),
            max_import_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let cache = match &config.cache_dir {
            Some(dir) => ImportCache::with_disk(dir, config.cache_ttl_hours),
            None => ImportCache::new(),
        };
        let writer_options = WriterOptions {
            format: config.output_format,
            ..WriterOptions::default()
        };
        Self::new()
            .with_cache(Arc::new(cache))
            .with_writer_options(writer_options)
    }

    pub fn with_registry(mut self, registry: FormatRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ImportCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_parse_options(mut self, options: ParseOptions) -> Self {
        self.parse_options = options;
        self
    }

    pub fn with_writer_options(mut self, options: WriterOptions) -> Self {
        self.writer_options = options;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_max_import_depth(mut self, depth: usize) -> Self {
        self.max_import_depth = depth;
        self
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ImportCache> {
        &self.cache
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn writer_options(&self) -> &WriterOptions {
        &self.writer_options
    }

    fn parser_for(&self, origin: Option<&Path>) -> Result<Arc<dyn SourceParser>> {
        match origin {
            Some(path) if path.extension().is_some() => self.registry.parser_for_path(path),
            _ => self.registry.parser("wdl"),
        }
    }

    /// Parse `content` and merge its imports, resolved next to `origin`.
    async fn load_text(
        &self,
        parser: Arc<dyn SourceParser>,
        content: &str,
        origin: Option<&Path>,
    ) -> Result<(Workflow, Vec<Diagnostic>)> {
        let (fragment, mut diagnostics) = parser.parse_text(content, origin, &self.parse_options)?;
        let base_dir = origin
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let resolver = ImportResolver::new(parser)
            .with_cache(self.cache.clone())
            .with_cancellation(self.cancel.clone())
            .with_max_depth(self.max_import_depth);
        let (workflow, resolved) = resolver.resolve(fragment, &base_dir).await?;
        diagnostics.extend(resolved);
        debug!(
            workflow = %workflow.name,
            tasks = workflow.tasks.len(),
            diagnostics = diagnostics.len(),
            "loaded workflow"
        );
        Ok((workflow, diagnostics))
    }

    /// Parse a file and resolve its imports, without validating.
    pub async fn parse_file(&self, source: &Path) -> Result<(Workflow, Vec<Diagnostic>)> {
        let content = tokio::fs::read_to_string(source)
            .await
            .map_err(|e| ConvertError::io(source, e))?;
        let parser = self.registry.parser_for_path(source)?;
        self.load_text(parser, &content, Some(source)).await
    }

    /// Parse, resolve and validate. Diagnostics from every phase, in order.
    pub async fn validate_file(&self, source: &Path) -> Result<(bool, Vec<Diagnostic>)> {
        let (workflow, mut diagnostics) = self.parse_file(source).await?;
        let (valid, validation) = validate(&workflow);
        diagnostics.extend(validation);
        Ok((valid && first_error(&diagnostics).is_none(), diagnostics))
    }

    fn write(
        &self,
        writer: &dyn TargetWriter,
        workflow: &Workflow,
        mut diagnostics: Vec<Diagnostic>,
        options: &WriterOptions,
    ) -> Result<Conversion> {
        if !options.best_effort {
            if let Some(error) = first_error(&diagnostics) {
                return Err(error.clone().into());
            }
        }
        let output = write_checked(writer, workflow, options)?;
        diagnostics.extend(output.diagnostics);
        Ok(Conversion {
            text: output.text,
            diagnostics,
        })
    }

    /// Convert in-memory source text into the named target format.
    pub async fn convert_text(
        &self,
        content: &str,
        origin: Option<&Path>,
        target: &str,
    ) -> Result<Conversion> {
        let parser = self.parser_for(origin)?;
        let writer = self.registry.writer(target)?;
        let (workflow, diagnostics) = self.load_text(parser, content, origin).await?;
        self.write(writer.as_ref(), &workflow, diagnostics, &self.writer_options)
    }

    /// Serialization implied by a destination: `.json` and `.yaml` decide it,
    /// anything else keeps the configured default.
    fn options_for(&self, destination: &Path) -> WriterOptions {
        let mut options = self.writer_options.clone();
        match destination
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => options.format = OutputFormat::Json,
            Some("yaml") | Some("yml") => options.format = OutputFormat::Yaml,
            _ => {}
        }
        options
    }

    /// Convert `source` into `destination`; the destination extension picks
    /// the writer. Nothing is written when the conversion fails.
    pub async fn convert_file(&self, source: &Path, destination: &Path) -> Result<Conversion> {
        let writer = self.registry.writer_for_path(destination)?;
        self.convert_file_with(source, destination, writer.as_ref()).await
    }

    pub(crate) async fn convert_file_with(
        &self,
        source: &Path,
        destination: &Path,
        writer: &dyn TargetWriter,
    ) -> Result<Conversion> {
        let (workflow, diagnostics) = self.parse_file(source).await?;
        let options = self.options_for(destination);
        let conversion = self.write(writer, &workflow, diagnostics, &options)?;

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConvertError::io(parent, e))?;
        }
        tokio::fs::write(destination, &conversion.text)
            .await
            .map_err(|e| ConvertError::io(destination, e))?;

        info!(
            source = %source.display(),
            destination = %destination.display(),
            writer = writer.name(),
            warnings = conversion.warnings().count(),
            "converted"
        );
        Ok(conversion)
    }

    /// Dependency analysis of a file after import resolution.
    pub async fn analyze_file(&self, source: &Path) -> Result<AnalysisReport> {
        let (workflow, mut diagnostics) = self.parse_file(source).await?;
        diagnostics.extend(validate(&workflow).1);
        Ok(analyze(&workflow, diagnostics))
    }
}

pub fn analyze(workflow: &Workflow, diagnostics: Vec<Diagnostic>) -> AnalysisReport {
    let graph = DependencyGraph::build(workflow);
    let (topological_order, cycle) = match graph.topological_order() {
        Ok(order) => (Some(order), None),
        Err(ConvertError::Cycle { nodes }) => (None, Some(nodes)),
        Err(_) => (None, None),
    };
    let dependencies = graph
        .nodes()
        .iter()
        .map(|node| {
            let upstream = graph
                .dependencies_of(node)
                .into_iter()
                .map(str::to_string)
                .collect();
            (node.clone(), upstream)
        })
        .collect();

    AnalysisReport {
        workflow: workflow.name.clone(),
        task_count: workflow.tasks.len(),
        call_count: workflow.calls.len(),
        has_cycles: cycle.is_some(),
        cycle,
        topological_order,
        levels: graph.levels().ok(),
        max_parallelism: graph.max_parallelism().ok(),
        dependencies,
        diagnostics,
        dot: graph.to_dot(),
    }
}
