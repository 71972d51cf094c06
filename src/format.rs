use crate::error::{ConvertError, Result};
use crate::parser::{SourceParser, WdlParser};
use crate::writer::{CwlWriter, TargetWriter, WdlWriter};
use std::path::Path;
use std::sync::Arc;

/// Parsers and writers by format name. Lookup by extension goes through each
/// entry's declared extensions in registration order.
#[derive(Clone)]
pub struct FormatRegistry {
    parsers: Vec<Arc<dyn SourceParser>>,
    writers: Vec<Arc<dyn TargetWriter>>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_parser(Arc::new(WdlParser));
        registry.register_writer(Arc::new(CwlWriter));
        registry.register_writer(Arc::new(WdlWriter));
        registry
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

impl FormatRegistry {
    pub fn empty() -> Self {
        Self {
            parsers: Vec::new(),
            writers: Vec::new(),
        }
    }

    /// Replaces any parser registered under the same name.
    pub fn register_parser(&mut self, parser: Arc<dyn SourceParser>) {
        self.parsers.retain(|p| p.name() != parser.name());
        self.parsers.push(parser);
    }

    pub fn register_writer(&mut self, writer: Arc<dyn TargetWriter>) {
        self.writers.retain(|w| w.name() != writer.name());
        self.writers.push(writer);
    }

    pub fn parser(&self, name: &str) -> Result<Arc<dyn SourceParser>> {
        self.parsers
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| ConvertError::UnknownFormat(name.to_string()))
    }

    pub fn writer(&self, name: &str) -> Result<Arc<dyn TargetWriter>> {
        self.writers
            .iter()
            .find(|w| w.name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| ConvertError::UnknownFormat(name.to_string()))
    }

    pub fn parser_for_path(&self, path: &Path) -> Result<Arc<dyn SourceParser>> {
        let ext = extension_of(path).unwrap_or_default();
        self.parsers
            .iter()
            .find(|p| p.extensions().contains(&ext.as_str()))
            .cloned()
            .ok_or_else(|| ConvertError::UnknownFormat(path.display().to_string()))
    }

    pub fn writer_for_path(&self, path: &Path) -> Result<Arc<dyn TargetWriter>> {
        let ext = extension_of(path).unwrap_or_default();
        self.writers
            .iter()
            .find(|w| w.extensions().contains(&ext.as_str()))
            .cloned()
            .ok_or_else(|| ConvertError::UnknownFormat(path.display().to_string()))
    }

    pub fn parser_names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    pub fn writer_names(&self) -> Vec<&'static str> {
        self.writers.iter().map(|w| w.name()).collect()
    }
}
