//! Regex tokenizer
//!
//! Splits text into letter runs, digit runs and single punctuation
//! characters unless a custom pattern is configured.

use regex::Regex;

use crate::span::TokenText;
use crate::{Result, SegtagError};

/// Default token pattern
pub const DEFAULT_TOKEN_PATTERN: &str = r"\p{L}+|\p{N}+|[^\s\p{L}\p{N}]";

/// Tokenizer driven by a single regex; every match is a token
#[derive(Debug, Clone)]
pub struct Tokenizer {
    pattern: Regex,
}

impl Tokenizer {
    /// Create a tokenizer from a regex pattern
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| SegtagError::ConfigError(format!("bad token pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Split text into tokens with their character offsets
    pub fn tokenize(&self, text: &str) -> Vec<TokenText> {
        self.pattern
            .find_iter(text)
            .filter(|m| !m.as_str().is_empty())
            .map(|m| TokenText {
                value: m.as_str().to_string(),
                lo: m.start(),
                hi: m.end(),
            })
            .collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_TOKEN_PATTERN).expect("default token pattern is valid"),
        }
    }
}
