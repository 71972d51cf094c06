use crate::cache::ImportCache;
use crate::diagnostic::{Diagnostic, DiagnosticKind, Location};
use crate::error::{ConvertError, Result};
use crate::ir::{Import, Workflow, WorkflowKind};
use crate::parser::{SourceParser, WdlParser};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_MAX_DEPTH: usize = 64;

pub struct ImportResolver {
    parser: Arc<dyn SourceParser>,
    cache: Arc<ImportCache>,
    cancel: CancellationToken,
    max_depth: usize,
}

impl ImportResolver {
    pub fn new(parser: Arc<dyn SourceParser>) -> Self {
        Self {
            parser,
            cache: Arc::new(ImportCache::new()),
            cancel: CancellationToken::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ImportCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Follow every import of `fragment`, relative to `base_dir`, and merge
    /// the imported tasks and workflows into it.
    ///
    /// Missing files, circular edges and collisions become diagnostics; only
    /// cancellation aborts resolution.
    pub async fn resolve(
        &self,
        fragment: Workflow,
        base_dir: &Path,
    ) -> Result<(Workflow, Vec<Diagnostic>)> {
        let mut stack = Vec::new();
        if let Some(origin) = &fragment.origin {
            if let Ok(path) = tokio::fs::canonicalize(origin).await {
                stack.push(path);
            }
        }
        let mut diagnostics = Vec::new();
        let workflow = self
            .resolve_fragment(fragment, base_dir.to_path_buf(), &mut stack, &mut diagnostics)
            .await?;
        Ok((workflow, diagnostics))
    }

    fn resolve_fragment<'a>(
        &'a self,
        mut fragment: Workflow,
        base_dir: PathBuf,
        stack: &'a mut Vec<PathBuf>,
        diagnostics: &'a mut Vec<Diagnostic>,
    ) -> Pin<Box<dyn Future<Output = Result<Workflow>> + Send + 'a>> {
        Box::pin(async move {
            let imports = fragment.imports.clone();
            for import in &imports {
                if self.cancel.is_cancelled() {
                    return Err(ConvertError::Cancelled);
                }
                self.resolve_single_import(&mut fragment, import, &base_dir, stack, diagnostics)
                    .await?;
            }
            Ok(fragment)
        })
    }

    async fn resolve_single_import(
        &self,
        parent: &mut Workflow,
        import: &Import,
        base_dir: &Path,
        stack: &mut Vec<PathBuf>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()> {
        let location = Location {
            file: parent.origin.clone(),
            line: import.line,
            scope: Some(format!("import {}", import.namespace)),
        };

        if import.path.starts_with("http://") || import.path.starts_with("https://") {
            diagnostics.push(Diagnostic::error(
                DiagnosticKind::MissingImport,
                location,
                format!("remote import '{}' is not supported", import.path),
            ));
            return Ok(());
        }

        let candidate = base_dir.join(&import.path);
        let path = match tokio::fs::canonicalize(&candidate).await {
            Ok(path) => path,
            Err(_) => {
                warn!(path = %candidate.display(), "import not found");
                diagnostics.push(Diagnostic::error(
                    DiagnosticKind::MissingImport,
                    location,
                    format!("imported file not found: {}", candidate.display()),
                ));
                return Ok(());
            }
        };

        if let Some(start) = stack.iter().position(|p| p == &path) {
            let mut chain = stack[start..].to_vec();
            chain.push(path);
            let err = ConvertError::CircularImport { chain };
            warn!("{}", err);
            diagnostics.push(Diagnostic::error(
                DiagnosticKind::CircularImport,
                location,
                err.to_string(),
            ));
            return Ok(());
        }

        if stack.len() >= self.max_depth {
            diagnostics.push(Diagnostic::error(
                DiagnosticKind::ImportDepth,
                location,
                format!(
                    "imports nested deeper than {} levels at {}",
                    self.max_depth,
                    path.display()
                ),
            ));
            return Ok(());
        }

        let fragment = match self.cache.load(&path, self.parser.as_ref()).await {
            Ok(fragment) => fragment,
            Err(ConvertError::Io { source, .. }) => {
                diagnostics.push(Diagnostic::error(
                    DiagnosticKind::MissingImport,
                    location,
                    format!("failed to read import {}: {}", path.display(), source),
                ));
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        for diagnostic in &fragment.diagnostics {
            push_unique(diagnostics, diagnostic.clone());
        }

        stack.push(path.clone());
        let child_base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let resolved = self
            .resolve_fragment(fragment.workflow.clone(), child_base, stack, diagnostics)
            .await;
        stack.pop();
        let resolved = resolved?;

        debug!(
            path = %path.display(),
            namespace = %import.namespace,
            tasks = resolved.tasks.len(),
            "merged import"
        );
        merge_import(parent, resolved, &import.namespace, &location, diagnostics);
        Ok(())
    }
}

fn push_unique(diagnostics: &mut Vec<Diagnostic>, diagnostic: Diagnostic) {
    if !diagnostics.contains(&diagnostic) {
        diagnostics.push(diagnostic);
    }
}

fn display_origin(origin: &Option<PathBuf>) -> String {
    origin
        .as_ref()
        .map_or_else(|| "<input>".to_string(), |p| p.display().to_string())
}

fn collision_warning(
    what: &str,
    name: &str,
    qualified: &str,
    new_origin: &Option<PathBuf>,
    kept_origin: &Option<PathBuf>,
    location: &Location,
) -> Diagnostic {
    warn!(name, qualified, "import collision");
    Diagnostic::warning(
        DiagnosticKind::ImportCollision,
        location.clone(),
        format!(
            "{} '{}' from {} collides with the one from {}; the first keeps '{}', this one is available as '{}'",
            what,
            name,
            display_origin(new_origin),
            display_origin(kept_origin),
            name,
            qualified
        ),
    )
}

/// Union a resolved import into `parent`.
///
/// A name already present in `parent` keeps its first definition. A later
/// definition of the same name from another file is kept as
/// `namespace.name`; one from the same file is the same definition and is
/// dropped silently.
fn merge_import(
    parent: &mut Workflow,
    mut imported: Workflow,
    namespace: &str,
    location: &Location,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // name inside the import -> name in the parent
    let mut exported: HashMap<String, String> = HashMap::new();

    for mut task in std::mem::take(&mut imported.tasks) {
        let name = task.name.clone();
        let existing = parent.task(&name).map(|t| t.origin.clone());
        let merged_name = match existing {
            None => {
                parent.tasks.push(task);
                name.clone()
            }
            Some(origin) if origin == task.origin => name.clone(),
            Some(origin) => {
                let qualified = format!("{}.{}", namespace, name);
                diagnostics.push(collision_warning(
                    "task", &name, &qualified, &task.origin, &origin, location,
                ));
                if parent.task(&qualified).is_none() {
                    task.name = qualified.clone();
                    parent.tasks.push(task);
                }
                qualified
            }
        };
        exported.insert(name, merged_name);
    }

    let mut moved = std::mem::take(&mut imported.subworkflows);
    let origin_name = imported.name.clone();
    if imported.kind == WorkflowKind::Workflow {
        moved.push(imported);
    }

    let mut incoming = Vec::new();
    for mut sub in moved {
        let name = sub.name.clone();
        let existing = parent.subworkflow(&name).map(|w| w.origin.clone());
        let merged_name = match existing {
            None => name.clone(),
            Some(origin) if origin == sub.origin => {
                exported.insert(name.clone(), name);
                continue;
            }
            Some(origin) => {
                let qualified = format!("{}.{}", namespace, name);
                diagnostics.push(collision_warning(
                    "workflow", &name, &qualified, &sub.origin, &origin, location,
                ));
                qualified
            }
        };
        sub.name = merged_name.clone();
        exported.insert(name, merged_name);
        incoming.push(sub);
    }

    for mut sub in incoming {
        for call in &mut sub.calls {
            if let Some(renamed) = exported.get(&call.callee) {
                call.callee = renamed.clone();
            }
        }
        if parent.subworkflow(&sub.name).is_none() {
            parent.subworkflows.push(sub);
        }
    }

    for call in &mut parent.calls {
        let Some((prefix, name)) = call.callee.split_once('.') else {
            continue;
        };
        if prefix == namespace {
            if let Some(merged) = exported.get(name) {
                call.callee = merged.clone();
            }
        }
    }

    debug!(namespace, workflow = %origin_name, "import namespace merged");
}

/// Resolve imports with the WDL parser and a private cache.
pub async fn resolve_imports(
    fragment: Workflow,
    base_dir: &Path,
) -> Result<(Workflow, Vec<Diagnostic>)> {
    ImportResolver::new(Arc::new(WdlParser))
        .resolve(fragment, base_dir)
        .await
}
