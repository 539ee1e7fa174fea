//! Segtag Core - Text model, label stores, and shared types
//!
//! This crate defines the core abstractions used throughout segtag:
//! - Documents, tokens and spans (`TextBase`, `Token`, `Span`)
//! - Label stores holding typed spans and token/span properties
//! - Regex tokenization and JSON corpus loading
//! - Common error types
//! - Configuration management

pub mod config;
pub mod corpus;
pub mod labels;
pub mod span;
pub mod tokenizer;

pub use config::{
    AppConfig, ConfigError, ExperimentConfig, LearnerKind, LoggingConfig, ReductionConfig,
    SegmentConfig, SequenceConfig, TaggingScheme, TokenizerConfig,
};
pub use corpus::{CorpusDocument, CorpusFile, CorpusSpan};
pub use labels::{
    BasicLabels, Details, MonotonicTextLabels, NestedLabels, SharedLabels, TextLabels,
};
pub use span::{Document, Span, TextBase, Token, TokenText};
pub use tokenizer::Tokenizer;

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for segtag operations
#[derive(Error, Debug)]
pub enum SegtagError {
    #[error("Empty span cannot be tagged: {0}")]
    EmptySpan(String),

    #[error("No span type or span property given for document {0}")]
    MissingTarget(String),

    #[error("Only one of span type or span property may be given (got type {span_type}, property {span_property})")]
    AmbiguousTarget {
        span_type: String,
        span_property: String,
    },

    #[error("Unknown document: {0}")]
    UnknownDocument(String),

    #[error("Invalid span: {0}")]
    InvalidSpan(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for SegtagError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SegtagError>;

// ============================================================================
// Tests
// ============================================================================
