//! Corpus documents.

use serde::{Deserialize, Serialize};

/// A single corpus document (title + abstract + optional structured tags).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier (e.g. a PubMed ID)
    pub id: String,
    /// Article title
    #[serde(default)]
    pub title: Option<String>,
    /// Article abstract
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    /// Structured tags such as MeSH headings
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Document {
    /// Create a document with title and abstract.
    pub fn new(id: impl Into<String>, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: Some(title.into()),
            abstract_text: Some(abstract_text.into()),
            tags: Vec::new(),
        }
    }

    /// A document is usable only when both title and abstract carry text.
    pub fn is_well_formed(&self) -> bool {
        let present = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.trim().is_empty());
        !self.id.trim().is_empty() && present(&self.title) && present(&self.abstract_text)
    }

    /// Text handed to the inference service.
    pub fn text(&self) -> String {
        let mut text = String::new();
        if let Some(title) = &self.title {
            text.push_str(title.trim());
        }
        if let Some(abstract_text) = &self.abstract_text {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(abstract_text.trim());
        }
        if !self.tags.is_empty() {
            text.push_str("\n\nTags: ");
            text.push_str(&self.tags.join("; "));
        }
        text
    }

    /// Case-insensitive check that the document mentions a term.
    pub fn mentions(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return false;
        }
        let hit = |field: &Option<String>| {
            field
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(&term))
        };
        hit(&self.title)
            || hit(&self.abstract_text)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&term))
    }
}
