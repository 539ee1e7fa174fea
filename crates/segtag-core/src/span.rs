//! Documents, tokens and spans
//!
//! A `TextBase` owns the documents and their tokens. `Token` and `Span` are
//! small value types that refer into a document by id and token index; they
//! never own token storage.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tokenizer::Tokenizer;
use crate::{Result, SegtagError};

// ============================================================================
// Token and Span
// ============================================================================

/// A single token, identified by its document and index within that document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token {
    pub document_id: String,
    pub index: usize,
}

impl Token {
    pub fn new(document_id: impl Into<String>, index: usize) -> Self {
        Self {
            document_id: document_id.into(),
            index,
        }
    }
}

/// A half-open token range `[start, start + length)` in one document.
///
/// Spans order by document id, then start, then length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    document_id: String,
    start: usize,
    length: usize,
}

impl Span {
    /// Create a span over `length` tokens starting at `start`
    pub fn new(document_id: impl Into<String>, start: usize, length: usize) -> Self {
        Self {
            document_id: document_id.into(),
            start,
            length,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Exclusive end index
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The `i`-th token of this span
    pub fn token(&self, i: usize) -> Token {
        Token::new(self.document_id.clone(), self.start + i)
    }

    /// Iterate over the tokens in this span
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        (self.start..self.end()).map(move |i| Token::new(self.document_id.clone(), i))
    }

    /// A span relative to this one (offset counted from `self.start()`)
    pub fn sub_span(&self, offset: usize, length: usize) -> Span {
        Span::new(self.document_id.clone(), self.start + offset, length)
    }

    /// True when `other` begins exactly where this span ends
    pub fn is_followed_by(&self, other: &Span) -> bool {
        self.document_id == other.document_id && self.end() == other.start
    }

    /// True when `other` lies entirely inside this span
    pub fn contains(&self, other: &Span) -> bool {
        self.document_id == other.document_id
            && other.start >= self.start
            && other.end() <= self.end()
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},{})", self.document_id, self.start, self.end())
    }
}

// ============================================================================
// Documents
// ============================================================================

/// Surface text of a token plus its character offsets in the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenText {
    pub value: String,
    pub lo: usize,
    pub hi: usize,
}

/// A tokenized document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub tokens: Vec<TokenText>,
}

impl Document {
    /// Span covering the whole document
    pub fn span(&self) -> Span {
        Span::new(self.id.clone(), 0, self.tokens.len())
    }

    /// Map a character range onto the tokens lying inside it
    pub fn char_span_to_tokens(&self, lo: usize, hi: usize) -> Option<Span> {
        let mut inside = self
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.lo >= lo && t.hi <= hi)
            .map(|(i, _)| i);
        let first = inside.next()?;
        let last = inside.last().unwrap_or(first);
        Some(Span::new(self.id.clone(), first, last - first + 1))
    }
}

/// Ordered collection of documents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextBase {
    documents: BTreeMap<String, Document>,
}

impl TextBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokenize `text` and add it as a document
    pub fn load_document(
        &mut self,
        id: impl Into<String>,
        text: impl Into<String>,
        tokenizer: &Tokenizer,
    ) -> Result<()> {
        let id = id.into();
        let text = text.into();
        if self.documents.contains_key(&id) {
            return Err(SegtagError::Corpus(format!("duplicate document id: {}", id)));
        }
        let tokens = tokenizer.tokenize(&text);
        self.documents
            .insert(id.clone(), Document { id, text, tokens });
        Ok(())
    }

    /// Add a document from pre-split tokens, joined by single spaces
    pub fn add_tokens(&mut self, id: impl Into<String>, tokens: &[&str]) {
        let id = id.into();
        let mut text = String::new();
        let mut token_texts = Vec::with_capacity(tokens.len());
        for (i, value) in tokens.iter().enumerate() {
            if i > 0 {
                text.push(' ');
            }
            let lo = text.len();
            text.push_str(value);
            token_texts.push(TokenText {
                value: value.to_string(),
                lo,
                hi: text.len(),
            });
        }
        self.documents.insert(
            id.clone(),
            Document {
                id,
                text,
                tokens: token_texts,
            },
        );
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// Spans covering each document, in document id order
    pub fn document_spans(&self) -> Vec<Span> {
        self.documents.values().map(Document::span).collect()
    }

    pub fn document_span(&self, id: &str) -> Option<Span> {
        self.documents.get(id).map(Document::span)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Surface value of a token
    pub fn token_value(&self, token: &Token) -> Option<&str> {
        self.documents
            .get(&token.document_id)
            .and_then(|d| d.tokens.get(token.index))
            .map(|t| t.value.as_str())
    }

    /// Text covered by a span, including inter-token whitespace
    pub fn span_text(&self, span: &Span) -> Option<&str> {
        let doc = self.documents.get(span.document_id())?;
        if span.is_empty() {
            return Some("");
        }
        let first = doc.tokens.get(span.start())?;
        let last = doc.tokens.get(span.end() - 1)?;
        doc.text.get(first.lo..last.hi)
    }

    /// Surface values of the tokens in a span
    pub fn span_tokens(&self, span: &Span) -> Vec<&str> {
        span.tokens()
            .filter_map(|t| self.token_value(&t))
            .collect()
    }

    /// Check that a span lies inside its document
    pub fn validate(&self, span: &Span) -> Result<()> {
        let doc = self
            .documents
            .get(span.document_id())
            .ok_or_else(|| SegtagError::UnknownDocument(span.document_id().to_string()))?;
        if span.end() > doc.tokens.len() {
            return Err(SegtagError::InvalidSpan(format!(
                "{} extends past the {} tokens of its document",
                span,
                doc.tokens.len()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
