use crate::diagnostic::Diagnostic;
use crate::error::{ConvertError, Result};
use crate::ir::Workflow;
use crate::parser::{ParseOptions, SourceParser};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

/// A parsed document whose imports have not been followed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFragment {
    pub workflow: Workflow,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    cache_key: String,
    path: PathBuf,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    fragment: ParsedFragment,
}

/// Parsed-import cache shared by every conversion in a run.
///
/// Each path is parsed at most once: concurrent loads of the same path wait
/// on a single initialization. Failed loads are not remembered. When a
/// directory is configured, fragments are also persisted as JSON keyed by a
/// hash of path and content.
pub struct ImportCache {
    entries: Mutex<HashMap<PathBuf, Arc<OnceCell<Arc<ParsedFragment>>>>>,
    disk_dir: Option<PathBuf>,
    ttl_hours: i64,
    parses: AtomicUsize,
}

impl Default for ImportCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            disk_dir: None,
            ttl_hours: 24,
            parses: AtomicUsize::new(0),
        }
    }

    pub fn with_disk(dir: impl Into<PathBuf>, ttl_hours: i64) -> Self {
        Self {
            disk_dir: Some(dir.into()),
            ttl_hours,
            ..Self::new()
        }
    }

    pub fn generate_cache_key(path: &Path, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Parsed fragment for `path`, reading and parsing it on first use.
    pub async fn load(
        &self,
        path: &Path,
        parser: &dyn SourceParser,
    ) -> Result<Arc<ParsedFragment>> {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.entry(path.to_path_buf()).or_default().clone()
        };

        cell.get_or_try_init(|| async {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConvertError::io(path, e))?;
            let cache_key = Self::generate_cache_key(path, &content);

            if let Some(fragment) = self.read_disk(&cache_key).await {
                debug!(path = %path.display(), "import loaded from disk cache");
                return Ok::<_, ConvertError>(Arc::new(fragment));
            }

            let (workflow, diagnostics) =
                parser.parse_text(&content, Some(path), &ParseOptions::default())?;
            self.parses.fetch_add(1, Ordering::Relaxed);
            let fragment = ParsedFragment {
                workflow,
                diagnostics,
            };
            self.write_disk(&cache_key, path, &fragment).await;
            Ok::<_, ConvertError>(Arc::new(fragment))
        })
        .await
        .cloned()
    }

    fn disk_path(&self, cache_key: &str) -> Option<PathBuf> {
        self.disk_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", cache_key)))
    }

    async fn read_disk(&self, cache_key: &str) -> Option<ParsedFragment> {
        let file = self.disk_path(cache_key)?;
        let raw = tokio::fs::read_to_string(&file).await.ok()?;
        let entry: DiskEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "discarding unreadable cache entry");
                return None;
            }
        };
        if entry.cache_key != cache_key || entry.expires_at <= Utc::now() {
            let _ = tokio::fs::remove_file(&file).await;
            return None;
        }
        Some(entry.fragment)
    }

    async fn write_disk(&self, cache_key: &str, path: &Path, fragment: &ParsedFragment) {
        let (Some(dir), Some(file)) = (self.disk_dir.as_ref(), self.disk_path(cache_key)) else {
            return;
        };
        let now = Utc::now();
        let entry = DiskEntry {
            cache_key: cache_key.to_string(),
            path: path.to_path_buf(),
            created_at: now,
            expires_at: now + Duration::hours(self.ttl_hours),
            fragment: fragment.clone(),
        };
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            let body = serde_json::to_vec(&entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            tokio::fs::write(&file, body).await
        };
        if let Err(e) = written.await {
            warn!(file = %file.display(), error = %e, "failed to write cache entry");
        }
    }

    /// Number of parses performed, not counting disk hits.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    pub async fn size(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn clear_all(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::WdlParser;

    const LIBRARY: &str = "version 1.0\ntask hello {\n  command <<< echo hello >>>\n}\n";

    #[test]
    fn test_generate_cache_key_deterministic() {
        let path = Path::new("/work/lib.wdl");
        let key1 = ImportCache::generate_cache_key(path, LIBRARY);
        let key2 = ImportCache::generate_cache_key(path, LIBRARY);
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 64);
    }

    #[test]
    fn test_generate_cache_key_depends_on_path_and_content() {
        let path = Path::new("/work/lib.wdl");
        let base = ImportCache::generate_cache_key(path, LIBRARY);
        assert_ne!(base, ImportCache::generate_cache_key(Path::new("/work/other.wdl"), LIBRARY));
        assert_ne!(base, ImportCache::generate_cache_key(path, "task other {}"));
    }

    #[tokio::test]
    async fn test_concurrent_loads_parse_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.wdl");
        tokio::fs::write(&path, LIBRARY).await.unwrap();

        let cache = Arc::new(ImportCache::new());
        let loads = (0..8).map(|_| {
            let cache = cache.clone();
            let path = path.clone();
            tokio::spawn(async move { cache.load(&path, &WdlParser).await })
        });
        for handle in futures::future::join_all(loads).await {
            let fragment = handle.unwrap().unwrap();
            assert_eq!(fragment.workflow.tasks[0].name, "hello");
        }

        assert_eq!(cache.parse_count(), 1);
        assert_eq!(cache.size().await, 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.wdl");
        let cache = ImportCache::new();

        assert!(matches!(
            cache.load(&path, &WdlParser).await,
            Err(ConvertError::Io { .. })
        ));
        assert_eq!(cache.size().await, 0);

        tokio::fs::write(&path, LIBRARY).await.unwrap();
        assert!(cache.load(&path, &WdlParser).await.is_ok());
    }

    #[tokio::test]
    async fn test_disk_cache_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let path = dir.path().join("lib.wdl");
        tokio::fs::write(&path, LIBRARY).await.unwrap();

        let first = ImportCache::with_disk(&cache_dir, 1);
        let parsed = first.load(&path, &WdlParser).await.unwrap();
        assert_eq!(first.parse_count(), 1);

        let second = ImportCache::with_disk(&cache_dir, 1);
        let cached = second.load(&path, &WdlParser).await.unwrap();
        assert_eq!(second.parse_count(), 0);
        assert_eq!(parsed, cached);
    }

    #[tokio::test]
    async fn test_disk_cache_expiration() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let path = dir.path().join("lib.wdl");
        tokio::fs::write(&path, LIBRARY).await.unwrap();

        ImportCache::with_disk(&cache_dir, 0)
            .load(&path, &WdlParser)
            .await
            .unwrap();

        let second = ImportCache::with_disk(&cache_dir, 0);
        second.load(&path, &WdlParser).await.unwrap();
        assert_eq!(second.parse_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.wdl");
        tokio::fs::write(&path, LIBRARY).await.unwrap();

        let cache = ImportCache::new();
        cache.load(&path, &WdlParser).await.unwrap();
        cache.clear_all().await;
        assert_eq!(cache.size().await, 0);
        cache.load(&path, &WdlParser).await.unwrap();
        assert_eq!(cache.parse_count(), 2);
    }
}
