//! Pluggable format parsers behind one contract
//!
//! Readers are the single place raw bytes become rows. Every reader
//! normalizes line endings before parsing, honors the shared `trim_values`
//! option, and distinguishes structurally invalid content from parser
//! failures with two separate error kinds.

pub mod csv;
pub mod json;
pub mod xml;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{EngineError, FactoryError, ReaderError};
use crate::models::{OptionBag, Row};
use crate::options::OptionDefinitions;

/// Parsed rows plus header metadata when the format has any
#[derive(Debug, Clone, Default)]
pub struct ReadResult {
    pub rows: Vec<Row>,
    pub headers: Option<Vec<String>>,
}

/// One format-specific parser
pub trait Reader: Send + Sync {
    fn reader_type(&self) -> &'static str;

    fn option_definitions(&self) -> OptionDefinitions;

    /// Format-specific parsing; `content` has normalized line endings and
    /// `options` is already validated and merged
    fn parse(&self, content: &str, options: &OptionBag) -> Result<ReadResult, ReaderError>;

    /// Shared entry point: validate and merge options, decode and
    /// normalize the raw bytes, then parse.
    fn read(&self, raw: &[u8], supplied: &OptionBag) -> Result<ReadResult, EngineError> {
        let defs = self.option_definitions();
        defs.validate(supplied)?;
        let options = defs.merge_with_defaults(supplied);

        let content = String::from_utf8_lossy(raw);
        let content = normalize_line_endings(&content);
        Ok(self.parse(&content, &options)?)
    }
}

/// Normalize CRLF and bare CR to LF
pub(crate) fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Apply the `trim_values` option to a freshly parsed string value
pub(crate) fn maybe_trim(value: String, trim: bool) -> String {
    if trim {
        value.trim().to_string()
    } else {
        value
    }
}

/// Type-keyed reader registry, same shape as the downloader factory
pub struct ReaderFactory {
    readers: BTreeMap<&'static str, Arc<dyn Reader>>,
}

impl ReaderFactory {
    pub fn new() -> Self {
        Self {
            readers: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register(Arc::new(csv::CsvReader));
        factory.register(Arc::new(json::JsonReader));
        factory.register(Arc::new(xml::XmlReader));
        factory
    }

    pub fn register(&mut self, reader: Arc<dyn Reader>) {
        self.readers.insert(reader.reader_type(), reader);
    }

    pub fn for_type(&self, reader_type: &str) -> Result<Arc<dyn Reader>, FactoryError> {
        self.readers
            .get(reader_type)
            .cloned()
            .ok_or_else(|| FactoryError::UnsupportedType {
                kind: "reader",
                requested: reader_type.to_string(),
                available: self.available_types().join(", "),
            })
    }

    pub fn has(&self, reader_type: &str) -> bool {
        self.readers.contains_key(reader_type)
    }

    pub fn available_types(&self) -> Vec<&'static str> {
        self.readers.keys().copied().collect()
    }
}

impl Default for ReaderFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}
