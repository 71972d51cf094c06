use std::path::PathBuf;
use thiserror::Error;

use crate::diagnostic::{Diagnostic, DiagnosticKind, Location};

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Parse error at {location}: {message}")]
    Parse { location: Location, message: String },

    #[error("Reference error at {location}: {message}")]
    Reference { location: Location, message: String },

    #[error("Type error: unrecognized type '{0}'")]
    Type(String),

    #[error("Unsupported type: {ty} has no {dialect} equivalent")]
    UnsupportedType { ty: String, dialect: String },

    #[error("Circular import: {}", chain.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(" -> "))]
    CircularImport { chain: Vec<PathBuf> },

    #[error("Unsupported construct at {location}: {construct}")]
    UnsupportedConstruct { location: Location, construct: String },

    #[error("Dependency cycle between calls: {}", nodes.join(" -> "))]
    Cycle { nodes: Vec<String> },

    #[error("{0}")]
    Diagnostic(Diagnostic),

    #[error("IO error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ConvertError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported(location: Location, construct: impl Into<String>) -> Self {
        ConvertError::UnsupportedConstruct {
            location,
            construct: construct.into(),
        }
    }
}

impl From<Diagnostic> for ConvertError {
    fn from(diagnostic: Diagnostic) -> Self {
        match diagnostic.kind {
            DiagnosticKind::Parse => ConvertError::Parse {
                location: diagnostic.location,
                message: diagnostic.message,
            },
            DiagnosticKind::Reference => ConvertError::Reference {
                location: diagnostic.location,
                message: diagnostic.message,
            },
            DiagnosticKind::UnsupportedConstruct => ConvertError::UnsupportedConstruct {
                location: diagnostic.location,
                construct: diagnostic.message,
            },
            _ => ConvertError::Diagnostic(diagnostic),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
