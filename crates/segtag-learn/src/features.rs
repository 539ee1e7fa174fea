//! Feature extraction
//!
//! Turns a span of a labeled document into an `Instance`. `TokenFeatures`
//! describes single tokens for the sequence learner; `SegmentFeatures`
//! describes whole candidate segments for the semi-Markov decoder.
//!
//! Token properties whose names start with `_` are internal (tags,
//! predictions) and are never turned into features.

use segtag_core::{Span, TextLabels, Token};

use crate::classify::Instance;

/// Computes a feature vector for a span. Must be deterministic.
pub trait SpanFeatureExtractor: Send + Sync {
    fn extract(&self, labels: &dyn TextLabels, span: &Span) -> Instance;
}

/// Shape of a string: upper, lower and digit characters become `X`, `x`
/// and `9`, and runs of the same class collapse to `X+`.
pub fn char_type_pattern(text: &str) -> String {
    let mut pattern = String::new();
    let mut last: Option<char> = None;
    let mut repeated = false;

    for c in text.chars() {
        let class = if c.is_uppercase() {
            'X'
        } else if c.is_lowercase() {
            'x'
        } else if c.is_numeric() {
            '9'
        } else {
            c
        };
        if last == Some(class) {
            if !repeated {
                pattern.push('+');
                repeated = true;
            }
        } else {
            pattern.push(class);
            last = Some(class);
            repeated = false;
        }
    }
    pattern
}

fn featurized_properties(labels: &dyn TextLabels) -> Vec<String> {
    labels
        .token_properties()
        .into_iter()
        .filter(|p| !p.starts_with('_'))
        .collect()
}

fn lower_value(labels: &dyn TextLabels, token: &Token) -> Option<String> {
    labels
        .text_base()
        .token_value(token)
        .map(str::to_lowercase)
}

/// Lowercased values of up to `window` tokens on each side of `span`
fn add_window(instance: &mut Instance, labels: &dyn TextLabels, span: &Span, window: usize) {
    let doc_len = labels
        .text_base()
        .document(span.document_id())
        .map(|d| d.tokens.len())
        .unwrap_or(0);

    for i in 1..=window {
        if span.start() >= i {
            let token = Token::new(span.document_id(), span.start() - i);
            if let Some(value) = lower_value(labels, &token) {
                instance.add_binary(format!("left.{}.eq.lc={}", i, value));
            }
        }
        let right = span.end() + i - 1;
        if right < doc_len {
            let token = Token::new(span.document_id(), right);
            if let Some(value) = lower_value(labels, &token) {
                instance.add_binary(format!("right.{}.eq.lc={}", i, value));
            }
        }
    }
}

// ============================================================================
// Token Features
// ============================================================================

/// Features of a single token and its neighbours.
///
/// Applied to a longer span, it describes the span's first token.
#[derive(Debug, Clone)]
pub struct TokenFeatures {
    window: usize,
}

impl TokenFeatures {
    pub fn new(window: usize) -> Self {
        Self { window }
    }
}

impl Default for TokenFeatures {
    fn default() -> Self {
        Self::new(3)
    }
}

impl SpanFeatureExtractor for TokenFeatures {
    fn extract(&self, labels: &dyn TextLabels, span: &Span) -> Instance {
        let mut instance = Instance::new();
        let token = span.token(0);

        if let Some(value) = labels.text_base().token_value(&token) {
            instance.add_binary(format!("eq.lc={}", value.to_lowercase()));
            instance.add_binary(format!("eq.charTypePattern={}", char_type_pattern(value)));
        }
        for prop in featurized_properties(labels) {
            if let Some(value) = labels.token_property(&token, &prop) {
                instance.add_binary(format!("eq.prop.{}={}", prop, value));
            }
        }
        add_window(&mut instance, labels, &span.sub_span(0, 1), self.window);

        instance
    }
}

// ============================================================================
// Segment Features
// ============================================================================

/// Features of a candidate segment: its text, shape, size, boundary tokens,
/// bag of tokens and surrounding window
#[derive(Debug, Clone)]
pub struct SegmentFeatures {
    window: usize,
}

impl SegmentFeatures {
    pub fn new(window: usize) -> Self {
        Self { window }
    }
}

impl Default for SegmentFeatures {
    fn default() -> Self {
        Self::new(5)
    }
}

impl SpanFeatureExtractor for SegmentFeatures {
    fn extract(&self, labels: &dyn TextLabels, span: &Span) -> Instance {
        let mut instance = Instance::new();
        let base = labels.text_base();
        let values = base.span_tokens(span);

        let text = values.join(" ");
        instance.add_binary(format!("eq.lc={}", text.to_lowercase()));
        instance.add_binary(format!("eq.charTypePattern={}", char_type_pattern(&values.concat())));
        instance.add_numeric("size", span.len() as f64);
        instance.add_binary(format!("exactSize={}", span.len()));

        for value in &values {
            instance.add_binary(format!("tokens.eq.lc={}", value.to_lowercase()));
        }
        if let Some(first) = values.first() {
            instance.add_binary(format!("first.eq.lc={}", first.to_lowercase()));
        }
        if let Some(last) = values.last() {
            instance.add_binary(format!("last.eq.lc={}", last.to_lowercase()));
        }

        let props = featurized_properties(labels);
        for token in span.tokens() {
            for prop in &props {
                if let Some(value) = labels.token_property(&token, prop) {
                    instance.add_binary(format!("tokens.eq.prop.{}={}", prop, value));
                }
            }
        }

        add_window(&mut instance, labels, span, self.window);
        instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segtag_core::{BasicLabels, MonotonicTextLabels, TextBase};
    use std::sync::Arc;

    fn labels() -> BasicLabels {
        let mut base = TextBase::new();
        base.add_tokens("d", &["Mr", "John", "Smith", "paid", "42"]);
        let mut labels = BasicLabels::new(Arc::new(base));
        labels.set_token_property(&Token::new("d", 1), "pos", "NNP");
        labels.set_token_property(&Token::new("d", 1), "_tag", "Begin");
        labels
    }

    #[test]
    fn test_char_type_pattern() {
        assert_eq!(char_type_pattern("Smith"), "Xx+");
        assert_eq!(char_type_pattern("IBM"), "X+");
        assert_eq!(char_type_pattern("a"), "x");
        assert_eq!(char_type_pattern("42"), "9+");
        assert_eq!(char_type_pattern("A-1"), "X-9");
    }

    #[test]
    fn test_token_features() {
        let labels = labels();
        let instance = TokenFeatures::new(1).extract(&labels, &Span::new("d", 1, 1));

        assert_eq!(instance.weight("eq.lc=john"), 1.0);
        assert_eq!(instance.weight("eq.charTypePattern=Xx+"), 1.0);
        assert_eq!(instance.weight("eq.prop.pos=NNP"), 1.0);
        assert_eq!(instance.weight("left.1.eq.lc=mr"), 1.0);
        assert_eq!(instance.weight("right.1.eq.lc=smith"), 1.0);
    }

    #[test]
    fn test_internal_properties_are_not_features() {
        let labels = labels();
        let instance = TokenFeatures::default().extract(&labels, &Span::new("d", 1, 1));
        assert!(instance.features().all(|(name, _)| !name.contains("_tag")));
    }

    #[test]
    fn test_window_stops_at_document_edges() {
        let labels = labels();
        let instance = TokenFeatures::new(3).extract(&labels, &Span::new("d", 0, 1));
        assert!(instance.features().all(|(name, _)| !name.starts_with("left.")));

        let instance = TokenFeatures::new(3).extract(&labels, &Span::new("d", 4, 1));
        assert!(instance.features().all(|(name, _)| !name.starts_with("right.")));
    }

    #[test]
    fn test_segment_features() {
        let labels = labels();
        let instance = SegmentFeatures::new(1).extract(&labels, &Span::new("d", 1, 2));

        assert_eq!(instance.weight("eq.lc=john smith"), 1.0);
        assert_eq!(instance.weight("size"), 2.0);
        assert_eq!(instance.weight("exactSize=2"), 1.0);
        assert_eq!(instance.weight("first.eq.lc=john"), 1.0);
        assert_eq!(instance.weight("last.eq.lc=smith"), 1.0);
        assert_eq!(instance.weight("tokens.eq.prop.pos=NNP"), 1.0);
        assert_eq!(instance.weight("left.1.eq.lc=mr"), 1.0);
        assert_eq!(instance.weight("right.1.eq.lc=paid"), 1.0);
    }
}
