//! Semi-Markov Decoder Tests
//!
//! Checks the decoder against brute-force search over all segmentations and
//! runs the structured perceptron to convergence on a small corpus.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use segtag_core::{BasicLabels, MonotonicTextLabels, SharedLabels, Span, TextBase, TextLabels};
use segtag_learn::classify::{BinaryClassifier, Instance};
use segtag_learn::features::SpanFeatureExtractor;
use segtag_learn::perceptron::Perceptron;
use segtag_learn::semi_markov::{best_segments, SegmentLearner};
use segtag_learn::teacher::{AnnotatorTeacher, TextLabelsTeacher};
use segtag_learn::{Annotator, AnnotatorLearner, ExtractionTarget};

/// Features: the lowercased segment text only
struct TextFeature;

impl SpanFeatureExtractor for TextFeature {
    fn extract(&self, labels: &dyn TextLabels, span: &Span) -> Instance {
        let text = labels.text_base().span_tokens(span).join(" ").to_lowercase();
        let mut instance = Instance::new();
        instance.add_binary(format!("text={}", text));
        instance
    }
}

/// Fixed score per (start, length), ignoring history
struct SegmentTable(HashMap<String, f64>);

impl BinaryClassifier for SegmentTable {
    fn score(&self, instance: &Instance) -> f64 {
        instance
            .features()
            .filter_map(|(name, _)| self.0.get(name))
            .sum()
    }
}

fn document(n: usize) -> (BasicLabels, Span) {
    let tokens: Vec<String> = (0..n).map(|i| format!("t{}", i)).collect();
    let tokens: Vec<&str> = tokens.iter().map(String::as_str).collect();
    let mut base = TextBase::new();
    base.add_tokens("doc", &tokens);
    (BasicLabels::new(Arc::new(base)), Span::new("doc", 0, n))
}

/// Assign `scores` in order to every segment of at most `max` tokens
fn table(labels: &BasicLabels, n: usize, max: usize, scores: &[i32]) -> SegmentTable {
    let mut entries = HashMap::new();
    let mut next = scores.iter().cycle();
    for start in 0..n {
        for len in 1..=max.min(n - start) {
            let text = labels.text_base().span_tokens(&Span::new("doc", start, len)).join(" ");
            let score = next.next().copied().unwrap_or_default();
            entries.insert(format!("text={}", text), score as f64);
        }
    }
    SegmentTable(entries)
}

fn score_of(labels: &BasicLabels, scorer: &SegmentTable, span: &Span) -> f64 {
    scorer.score(&TextFeature.extract(labels, span))
}

/// Best total over every set of non-overlapping segments
fn brute_force(labels: &BasicLabels, scorer: &SegmentTable, n: usize, max: usize) -> f64 {
    let mut best = vec![0.0; n + 1];
    for t in (0..n).rev() {
        best[t] = best[t + 1];
        for len in 1..=max.min(n - t) {
            let kept = score_of(labels, scorer, &Span::new("doc", t, len)) + best[t + len];
            if kept > best[t] {
                best[t] = kept;
            }
        }
    }
    best[0]
}

// =============================================================================
// Decoder
// =============================================================================

proptest! {
    #[test]
    fn decoder_matches_brute_force(
        n in 0usize..7,
        max in 1usize..4,
        scores in prop::collection::vec(-3i32..4, 1..20),
    ) {
        let (labels, doc) = document(n);
        let scorer = table(&labels, n, max, &scores);

        let segments = best_segments(&doc, &labels, &TextFeature, &scorer, max);
        let total: f64 = segments.iter().map(|s| score_of(&labels, &scorer, s)).sum();

        let mut end = 0;
        for span in segments.iter() {
            prop_assert!(span.start() >= end, "overlapping segment {}", span);
            prop_assert!(span.len() >= 1 && span.len() <= max);
            end = span.end();
        }
        prop_assert!(end <= n);
        prop_assert!((total - brute_force(&labels, &scorer, n, max)).abs() < 1e-9);
    }

    #[test]
    fn non_positive_scores_keep_nothing(
        n in 0usize..7,
        max in 1usize..4,
        scores in prop::collection::vec(-3i32..1, 1..20),
    ) {
        let (labels, doc) = document(n);
        let scorer = table(&labels, n, max, &scores);
        prop_assert!(best_segments(&doc, &labels, &TextFeature, &scorer, max).is_empty());
    }
}

#[test]
fn test_tie_prefers_null_segment() {
    let (labels, doc) = document(1);
    let scorer = SegmentTable(HashMap::from([("text=t0".to_string(), 0.0)]));
    assert!(best_segments(&doc, &labels, &TextFeature, &scorer, 1).is_empty());
}

// =============================================================================
// Training
// =============================================================================

fn training_store() -> SharedLabels {
    let mut base = TextBase::new();
    base.add_tokens("d1", &["a", "X", "Y", "b"]);
    base.add_tokens("d2", &["c", "Z", "d"]);
    let mut labels = BasicLabels::new(Arc::new(base));
    labels.add_to_type(Span::new("d1", 1, 2), "name");
    labels.add_to_type(Span::new("d2", 1, 1), "name");
    Arc::new(labels)
}

#[test]
fn test_structured_perceptron_converges() {
    let labels = training_store();
    let teacher = TextLabelsTeacher::new(labels.clone(), ExtractionTarget::Type("name".to_string()));
    let mut learner =
        SegmentLearner::new(Arc::new(TextFeature), Box::new(Perceptron::new()), 5, 5);
    learner.set_annotation_type("found");

    let annotator = teacher.train(&mut learner).unwrap();

    let stats = learner.epoch_stats();
    assert_eq!(stats.len(), 5);
    assert!(stats[0].mistakes() > 0);
    assert_eq!(stats.last().map(|s| s.mistakes()), Some(0));

    let view = annotator.annotate(labels.clone()).unwrap();
    for doc in ["d1", "d2"] {
        assert_eq!(view.instances("found", doc), labels.instances("name", doc));
    }
}

#[test]
fn test_retraining_resets_examples() {
    let labels = training_store();
    let teacher = TextLabelsTeacher::new(labels, ExtractionTarget::Type("name".to_string()))
        .with_documents(vec![Span::new("d2", 0, 3)]);
    let mut learner =
        SegmentLearner::new(Arc::new(TextFeature), Box::new(Perceptron::new()), 2, 5);

    teacher.train(&mut learner).unwrap();
    let first: Vec<usize> = learner.epoch_stats().iter().map(|s| s.mistakes()).collect();
    teacher.train(&mut learner).unwrap();
    let second: Vec<usize> = learner.epoch_stats().iter().map(|s| s.mistakes()).collect();

    assert_eq!(first, second);
}
