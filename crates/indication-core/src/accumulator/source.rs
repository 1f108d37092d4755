//! Document source contract and the in-memory corpus.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::models::{normalize_text, Document};

/// Document source errors.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Document source unavailable: {0}")]
    Unavailable(String),

    #[error("Cannot read corpus {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corpus line {line}: {message}")]
    Parse { line: usize, message: String },
}

pub type SourceResult<T> = Result<T, SourceError>;

/// A finite, ordered, replayable document sequence per substance.
pub trait DocumentSource: Send + Sync {
    /// Documents `offset..offset + limit` of the substance's sequence.
    fn fetch(
        &self,
        substance: &str,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = SourceResult<Vec<Document>>> + Send;

    /// Documents mentioning both the substance and a condition, paged the same way.
    fn fetch_cooccurring(
        &self,
        substance: &str,
        condition: &str,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = SourceResult<Vec<Document>>> + Send;
}

/// One line of a JSONL corpus file.
#[derive(Debug, Deserialize)]
struct CorpusRecord {
    substance: String,
    #[serde(flatten)]
    document: Document,
}

/// In-memory corpus keyed by normalized substance name.
#[derive(Debug, Default, Clone)]
pub struct VecDocumentSource {
    corpus: HashMap<String, Vec<Document>>,
}

impl VecDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append documents to a substance's sequence.
    pub fn add(&mut self, substance: &str, documents: impl IntoIterator<Item = Document>) {
        self.corpus
            .entry(normalize_text(substance))
            .or_default()
            .extend(documents);
    }

    pub fn with_documents(mut self, substance: &str, documents: Vec<Document>) -> Self {
        self.add(substance, documents);
        self
    }

    /// Load a JSONL file: one `{"substance", "id", "title", "abstract", "tags"}` per line.
    pub fn load_jsonl<P: AsRef<Path>>(path: P) -> SourceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_jsonl(&text)
    }

    pub fn from_jsonl(text: &str) -> SourceResult<Self> {
        let mut source = Self::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: CorpusRecord = serde_json::from_str(line).map_err(|e| SourceError::Parse {
                line: i + 1,
                message: e.to_string(),
            })?;
            source.add(&record.substance, [record.document]);
        }
        Ok(source)
    }

    /// Number of documents for a substance.
    pub fn count(&self, substance: &str) -> usize {
        self.corpus
            .get(&normalize_text(substance))
            .map_or(0, Vec::len)
    }

    fn documents(&self, substance: &str) -> &[Document] {
        self.corpus
            .get(&normalize_text(substance))
            .map_or(&[], Vec::as_slice)
    }
}

impl DocumentSource for VecDocumentSource {
    async fn fetch(&self, substance: &str, offset: usize, limit: usize) -> SourceResult<Vec<Document>> {
        Ok(self
            .documents(substance)
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_cooccurring(
        &self,
        substance: &str,
        condition: &str,
        offset: usize,
        limit: usize,
    ) -> SourceResult<Vec<Document>> {
        Ok(self
            .documents(substance)
            .iter()
            .filter(|d| d.mentions(condition))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
