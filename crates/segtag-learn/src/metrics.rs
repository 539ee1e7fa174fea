//! Extraction quality metrics
//!
//! Compares predicted spans against gold spans per document, both as whole
//! spans and as the tokens they cover, and aggregates the counts into
//! precision, recall and F1.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use segtag_core::{Span, TextLabels, Token};

use crate::{AnnotationExample, ExtractionTarget};

// ============================================================================
// Span Metrics
// ============================================================================

/// Match counts between a gold and a predicted set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl SpanMetrics {
    /// Count matches between two sets
    pub fn between<T: Ord>(gold: &BTreeSet<T>, predicted: &BTreeSet<T>) -> Self {
        let true_positives = gold.intersection(predicted).count();
        Self {
            true_positives,
            false_positives: predicted.len() - true_positives,
            false_negatives: gold.len() - true_positives,
        }
    }

    /// Calculate precision (TP / (TP + FP))
    pub fn precision(&self) -> f64 {
        let predicted = self.true_positives + self.false_positives;
        if predicted == 0 {
            0.0
        } else {
            self.true_positives as f64 / predicted as f64
        }
    }

    /// Calculate recall (TP / (TP + FN))
    pub fn recall(&self) -> f64 {
        let gold = self.true_positives + self.false_negatives;
        if gold == 0 {
            0.0
        } else {
            self.true_positives as f64 / gold as f64
        }
    }

    /// Calculate F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn gold_total(&self) -> usize {
        self.true_positives + self.false_negatives
    }

    pub fn predicted_total(&self) -> usize {
        self.true_positives + self.false_positives
    }

    fn add(&mut self, other: &SpanMetrics) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
    }
}

/// Span-level and token-level counts for one document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetrics {
    pub spans: SpanMetrics,
    pub tokens: SpanMetrics,
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluator for extracted spans
#[derive(Debug, Clone)]
pub struct Evaluator {
    /// Property targets also require the predicted value to match
    match_values: bool,
}

impl Evaluator {
    pub fn new() -> Self {
        Self { match_values: true }
    }

    /// Enable/disable value matching for property targets
    pub fn with_value_matching(mut self, match_values: bool) -> Self {
        self.match_values = match_values;
        self
    }

    /// Compare the gold spans of `gold` with the spans of `predicted_type`
    /// in `predicted`. Predicted values are read from `class_property`.
    pub fn evaluate_document(
        &self,
        gold: &AnnotationExample,
        predicted: &dyn TextLabels,
        predicted_type: &str,
        class_property: &str,
    ) -> DocumentMetrics {
        let doc_id = gold.document_id();
        let compare_values =
            self.match_values && matches!(gold.target(), ExtractionTarget::Property(_));

        let gold_spans: BTreeSet<(Span, Option<String>)> = gold
            .target()
            .spans(gold.labels().as_ref(), doc_id)
            .into_iter()
            .map(|span| {
                let value = if compare_values {
                    gold.class_name(&span)
                } else {
                    None
                };
                (span, value)
            })
            .collect();
        let predicted_spans: BTreeSet<(Span, Option<String>)> = predicted
            .instances(predicted_type, doc_id)
            .into_iter()
            .map(|span| {
                let value = if compare_values {
                    predicted.span_property(&span, class_property).map(str::to_string)
                } else {
                    None
                };
                (span, value)
            })
            .collect();

        DocumentMetrics {
            spans: SpanMetrics::between(&gold_spans, &predicted_spans),
            tokens: SpanMetrics::between(
                &covered_tokens(gold_spans.iter().map(|(s, _)| s)),
                &covered_tokens(predicted_spans.iter().map(|(s, _)| s)),
            ),
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn covered_tokens<'a>(spans: impl Iterator<Item = &'a Span>) -> BTreeSet<Token> {
    spans.flat_map(|span| span.tokens().collect::<Vec<_>>()).collect()
}

// ============================================================================
// Aggregate Metrics
// ============================================================================

/// Aggregate metrics over a batch of documents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub span_metrics: SpanMetrics,
    pub token_metrics: SpanMetrics,
    pub num_documents: usize,
}

impl AggregateMetrics {
    /// Add one document's counts
    pub fn add_document(&mut self, metrics: &DocumentMetrics) {
        self.span_metrics.add(&metrics.spans);
        self.token_metrics.add(&metrics.tokens);
        self.num_documents += 1;
    }

    /// Print a summary report
    pub fn report(&self) -> String {
        format!(
            "=== Extraction Quality Report ===\n\n\
             Documents evaluated: {}\n\n\
             Spans:\n\
               Precision: {:.1}%\n\
               Recall:    {:.1}%\n\
               F1 Score:  {:.1}%\n\
               Gold: {} | Predicted: {} | TP: {} | FP: {} | FN: {}\n\n\
             Tokens:\n\
               Precision: {:.1}%\n\
               Recall:    {:.1}%\n\
               F1 Score:  {:.1}%\n\
               Gold: {} | Predicted: {} | TP: {} | FP: {} | FN: {}\n",
            self.num_documents,
            self.span_metrics.precision() * 100.0,
            self.span_metrics.recall() * 100.0,
            self.span_metrics.f1_score() * 100.0,
            self.span_metrics.gold_total(),
            self.span_metrics.predicted_total(),
            self.span_metrics.true_positives,
            self.span_metrics.false_positives,
            self.span_metrics.false_negatives,
            self.token_metrics.precision() * 100.0,
            self.token_metrics.recall() * 100.0,
            self.token_metrics.f1_score() * 100.0,
            self.token_metrics.gold_total(),
            self.token_metrics.predicted_total(),
            self.token_metrics.true_positives,
            self.token_metrics.false_positives,
            self.token_metrics.false_negatives,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use segtag_core::{BasicLabels, MonotonicTextLabels, SharedLabels, TextBase};
    use std::sync::Arc;

    #[test]
    fn test_span_metrics_precision_recall() {
        let metrics = SpanMetrics {
            true_positives: 8,
            false_positives: 2,
            false_negatives: 0,
        };
        assert!((metrics.precision() - 0.8).abs() < 1e-9);
        assert!((metrics.recall() - 1.0).abs() < 1e-9);

        let metrics = SpanMetrics {
            true_positives: 80,
            false_positives: 20,
            false_negatives: 20,
        };
        assert!((metrics.f1_score() - 0.8).abs() < 1e-9);
        assert_eq!(SpanMetrics::default().f1_score(), 0.0);
    }

    fn labels() -> BasicLabels {
        let mut base = TextBase::new();
        base.add_tokens("d", &["a", "b", "c", "d", "e"]);
        let mut labels = BasicLabels::new(Arc::new(base));
        labels.add_to_type(Span::new("d", 0, 2), "gold");
        labels.add_to_type(Span::new("d", 3, 1), "gold");
        labels.set_span_property(&Span::new("d", 0, 2), "kind", "X");
        labels.set_span_property(&Span::new("d", 3, 1), "kind", "Y");
        labels
    }

    #[test]
    fn test_evaluate_document_spans_and_tokens() {
        let mut labels = labels();
        labels.add_to_type(Span::new("d", 0, 2), "pred");
        labels.add_to_type(Span::new("d", 3, 2), "pred");
        let shared: SharedLabels = Arc::new(labels);

        let gold = AnnotationExample::new(
            Span::new("d", 0, 5),
            shared.clone(),
            ExtractionTarget::Type("gold".to_string()),
        );
        let metrics = Evaluator::new().evaluate_document(&gold, shared.as_ref(), "pred", "class");

        assert_eq!(
            metrics.spans,
            SpanMetrics {
                true_positives: 1,
                false_positives: 1,
                false_negatives: 1
            }
        );
        assert_eq!(
            metrics.tokens,
            SpanMetrics {
                true_positives: 3,
                false_positives: 1,
                false_negatives: 0
            }
        );
    }

    #[test]
    fn test_property_values_must_match() {
        let mut labels = labels();
        labels.add_to_type(Span::new("d", 0, 2), "pred");
        labels.add_to_type(Span::new("d", 3, 1), "pred");
        labels.set_span_property(&Span::new("d", 0, 2), "class", "X");
        labels.set_span_property(&Span::new("d", 3, 1), "class", "Z");
        let shared: SharedLabels = Arc::new(labels);

        let gold = AnnotationExample::new(
            Span::new("d", 0, 5),
            shared.clone(),
            ExtractionTarget::Property("kind".to_string()),
        );
        let strict = Evaluator::new().evaluate_document(&gold, shared.as_ref(), "pred", "class");
        assert_eq!(strict.spans.true_positives, 1);

        let relaxed = Evaluator::new()
            .with_value_matching(false)
            .evaluate_document(&gold, shared.as_ref(), "pred", "class");
        assert_eq!(relaxed.spans.true_positives, 2);
    }

    #[test]
    fn test_aggregate_report() {
        let mut aggregate = AggregateMetrics::default();
        let doc = DocumentMetrics {
            spans: SpanMetrics {
                true_positives: 2,
                false_positives: 1,
                false_negatives: 1,
            },
            tokens: SpanMetrics::default(),
        };
        aggregate.add_document(&doc);
        aggregate.add_document(&doc);

        assert_eq!(aggregate.num_documents, 2);
        assert_eq!(aggregate.span_metrics.true_positives, 4);
        let report = aggregate.report();
        assert!(report.contains("Documents evaluated: 2"));
        assert!(report.contains("Spans:"));
        assert!(report.contains("Tokens:"));
    }
}
