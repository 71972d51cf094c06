use super::Converter;
use crate::error::{ConvertError, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Glob over file names or paths relative to the source directory.
    pub pattern: String,
    pub recursive: bool,
    /// Writer name; its preferred extension names the outputs.
    pub target: String,
    pub jobs: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            pattern: "*.wdl".to_string(),
            recursive: true,
            target: "cwl".to_string(),
            jobs: 4,
        }
    }
}

/// What happened to one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Converted {
        source: PathBuf,
        destination: PathBuf,
        warnings: usize,
    },
    Failed {
        source: PathBuf,
        error: String,
    },
}

impl FileOutcome {
    pub fn source(&self) -> &Path {
        match self {
            FileOutcome::Converted { source, .. } | FileOutcome::Failed { source, .. } => source,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Converted { .. })
    }
}

/// One outcome per matched file, sorted by source path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub source_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A file to convert, or a directory entry that could not be read.
enum Candidate {
    File { source: PathBuf, relative: PathBuf },
    Unreadable { source: PathBuf, error: String },
}

fn collect_candidates(
    source_dir: &Path,
    pattern: &Pattern,
    recursive: bool,
) -> Vec<Candidate> {
    let walker = WalkDir::new(source_dir)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut candidates = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let source = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| source_dir.to_path_buf());
                warn!(path = %source.display(), error = %e, "skipping unreadable entry");
                candidates.push(Candidate::Unreadable {
                    source,
                    error: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(entry.file_name()));
        let name_matches = pattern.matches(&entry.file_name().to_string_lossy());
        if name_matches || pattern.matches_path(&relative) {
            candidates.push(Candidate::File {
                source: entry.into_path(),
                relative,
            });
        }
    }
    candidates
}

impl Converter {
    /// Convert every matching file under `source_dir` into `destination_dir`,
    /// mirroring relative paths. One file's failure never stops the others;
    /// cancellation marks the files not yet started as failed.
    pub async fn convert_dir(
        &self,
        source_dir: &Path,
        destination_dir: &Path,
        options: &BatchOptions,
    ) -> Result<BatchReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let metadata = tokio::fs::metadata(source_dir)
            .await
            .map_err(|e| ConvertError::io(source_dir, e))?;
        if !metadata.is_dir() {
            return Err(ConvertError::io(
                source_dir,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }
        let pattern = Pattern::new(&options.pattern)?;
        let writer = self.registry().writer(&options.target)?;
        let extension = writer.extensions().first().copied().unwrap_or("out");

        let candidates = collect_candidates(source_dir, &pattern, options.recursive);
        info!(
            %run_id,
            source = %source_dir.display(),
            files = candidates.len(),
            jobs = options.jobs,
            "starting batch conversion"
        );

        let writer = writer.as_ref();
        let mut outcomes: Vec<FileOutcome> = stream::iter(candidates)
            .map(|candidate| async move {
                let (source, relative) = match candidate {
                    Candidate::File { source, relative } => (source, relative),
                    Candidate::Unreadable { source, error } => {
                        return FileOutcome::Failed { source, error };
                    }
                };
                if self.cancellation().is_cancelled() {
                    return FileOutcome::Failed {
                        source,
                        error: ConvertError::Cancelled.to_string(),
                    };
                }
                let destination = destination_dir.join(relative).with_extension(extension);
                match self.convert_file_with(&source, &destination, writer).await {
                    Ok(conversion) => FileOutcome::Converted {
                        source,
                        destination,
                        warnings: conversion.warnings().count(),
                    },
                    Err(e) => {
                        warn!(source = %source.display(), error = %e, "conversion failed");
                        FileOutcome::Failed {
                            source,
                            error: e.to_string(),
                        }
                    }
                }
            })
            .buffer_unordered(options.jobs.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.source().cmp(b.source()));

        let report = BatchReport {
            run_id,
            source_dir: source_dir.to_path_buf(),
            destination_dir: destination_dir.to_path_buf(),
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            %run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch conversion finished"
        );
        Ok(report)
    }
}
