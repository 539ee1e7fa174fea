//! JSON corpus loading
//!
//! A corpus file lists documents with their raw text and character-offset
//! span annotations. Loading tokenizes every document and maps each span
//! onto the tokens it covers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::labels::{BasicLabels, MonotonicTextLabels};
use crate::span::TextBase;
use crate::tokenizer::Tokenizer;
use crate::{Result, SegtagError};

/// Top-level corpus file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusFile {
    pub documents: Vec<CorpusDocument>,
}

/// One annotated document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub spans: Vec<CorpusSpan>,
    /// When true, every span type in the corpus is closed over this document
    #[serde(default = "default_closed")]
    pub closed: bool,
}

fn default_closed() -> bool {
    true
}

/// A typed span given by character offsets `[lo, hi)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSpan {
    #[serde(rename = "type")]
    pub span_type: String,
    pub lo: usize,
    pub hi: usize,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl CorpusFile {
    /// Read a corpus from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SegtagError::Corpus(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse a corpus from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| SegtagError::Corpus(format!("invalid corpus JSON: {}", e)))
    }

    /// Tokenize the documents and build a label store holding the annotations
    pub fn into_labels(self, tokenizer: &Tokenizer) -> Result<BasicLabels> {
        let mut base = TextBase::new();
        for doc in &self.documents {
            base.load_document(doc.id.clone(), doc.text.clone(), tokenizer)?;
        }
        let base = Arc::new(base);
        let mut labels = BasicLabels::new(base.clone());

        let all_types: BTreeSet<&str> = self
            .documents
            .iter()
            .flat_map(|d| d.spans.iter().map(|s| s.span_type.as_str()))
            .collect();

        for doc in &self.documents {
            let document = base
                .document(&doc.id)
                .ok_or_else(|| SegtagError::UnknownDocument(doc.id.clone()))?;

            for annotation in &doc.spans {
                let span = document
                    .char_span_to_tokens(annotation.lo, annotation.hi)
                    .ok_or_else(|| {
                        SegtagError::Corpus(format!(
                            "span {}:[{},{}) in document {} covers no tokens",
                            annotation.span_type, annotation.lo, annotation.hi, doc.id
                        ))
                    })?;
                for (prop, value) in &annotation.properties {
                    labels.set_span_property(&span, prop, value);
                }
                labels.add_to_type(span, &annotation.span_type);
            }

            if doc.closed {
                for span_type in &all_types {
                    labels.close_type_inside(span_type, document.span());
                }
            }
        }

        Ok(labels)
    }
}
