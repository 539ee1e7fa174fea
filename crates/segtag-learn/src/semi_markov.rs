//! Conditional semi-Markov segmentation
//!
//! `best_segments` finds the highest scoring split of a document into kept
//! segments (at most `max_segment_size` tokens) and single-token null
//! segments. A kept segment `[t', t)` scores `classifier.score` of its
//! features plus the class of the segment before it; a null segment scores
//! zero. `SegmentLearner` trains the classifier with the structured
//! perceptron loop: decode each document, then push every wrongly kept
//! segment down and every missed segment up.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, Level};

use segtag_core::{
    MonotonicTextLabels, NestedLabels, Result, SegmentConfig, SegtagError, SharedLabels, Span,
    TextLabels,
};

use crate::classify::{BinaryClassifier, Example, OnlineBinaryLearner, NEG_CLASS, POS_CLASS};
use crate::features::{SegmentFeatures, SpanFeatureExtractor};
use crate::perceptron::Perceptron;
use crate::{AnnotationExample, Annotator, AnnotatorLearner};

const NULL: usize = 0;
const KEPT: usize = 1;

// ============================================================================
// Segments
// ============================================================================

/// Kept segments of one document, in span order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segments {
    spans: BTreeSet<Span>,
}

impl Segments {
    pub fn new(spans: impl IntoIterator<Item = Span>) -> Self {
        Self {
            spans: spans.into_iter().collect(),
        }
    }

    pub fn contains(&self, span: &Span) -> bool {
        self.spans.contains(span)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl IntoIterator for Segments {
    type Item = Span;
    type IntoIter = std::collections::btree_set::IntoIter<Span>;

    fn into_iter(self) -> Self::IntoIter {
        self.spans.into_iter()
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Where the best path into a table cell came from
#[derive(Debug, Clone, Copy)]
struct BackPointer {
    start: usize,
    last_y: usize,
}

fn history_class(last_y: usize) -> &'static str {
    if last_y == KEPT {
        POS_CLASS
    } else {
        NEG_CLASS
    }
}

/// Best segmentation of `document` under `classifier`.
///
/// Cells are updated only on strictly better scores, so ties go to the null
/// class and to the earliest predecessor.
pub fn best_segments(
    document: &Span,
    labels: &dyn TextLabels,
    fe: &dyn SpanFeatureExtractor,
    classifier: &dyn BinaryClassifier,
    max_segment_size: usize,
) -> Segments {
    let n = document.len();
    let max_size = [1, max_segment_size];
    let cell = |t: usize, y: usize| 2 * t + y;

    let mut best = vec![f64::NEG_INFINITY; 2 * (n + 1)];
    let mut back: Vec<Option<BackPointer>> = vec![None; 2 * (n + 1)];
    best[cell(0, NULL)] = 0.0;
    best[cell(0, KEPT)] = 0.0;

    for t in 1..=n {
        // Kept-segment scores for every start, by predecessor class
        let lo = t.saturating_sub(max_segment_size);
        let kept: Vec<[f64; 2]> = (lo..t)
            .map(|start| {
                let segment = document.sub_span(start, t - start);
                let instance = fe.extract(labels, &segment);
                [NULL, KEPT].map(|last_y| {
                    classifier.score(&instance.with_history(&[history_class(last_y)]))
                })
            })
            .collect();

        for y in [NULL, KEPT] {
            for last_y in [NULL, KEPT] {
                for start in t.saturating_sub(max_size[y])..t {
                    let score = if y == KEPT {
                        kept[start - lo][last_y]
                    } else {
                        0.0
                    };
                    let candidate = best[cell(start, last_y)] + score;
                    if candidate > best[cell(t, y)] {
                        best[cell(t, y)] = candidate;
                        back[cell(t, y)] = Some(BackPointer { start, last_y });
                    }
                }
            }
        }
    }

    let mut y = if best[cell(n, KEPT)] > best[cell(n, NULL)] {
        KEPT
    } else {
        NULL
    };
    let mut t = n;
    let mut path = BTreeSet::new();
    let mut spans = BTreeSet::new();
    while let Some(bp) = back[cell(t, y)] {
        path.insert(cell(t, y));
        if y == KEPT {
            spans.insert(document.sub_span(bp.start, t - bp.start));
        }
        t = bp.start;
        y = bp.last_y;
    }

    if tracing::enabled!(Level::TRACE) {
        dump_table(document, &best, &back, &path);
    }
    Segments { spans }
}

fn dump_table(
    document: &Span,
    best: &[f64],
    back: &[Option<BackPointer>],
    path: &BTreeSet<usize>,
) {
    for (i, (score, bp)) in best.iter().zip(back).enumerate() {
        let (t, y) = (i / 2, i % 2);
        match bp {
            Some(bp) => trace!(
                document = %document,
                "{}.{}\t{:.3}\t{}.{}\t[{},{}){}",
                t,
                y,
                score,
                bp.start,
                bp.last_y,
                bp.start,
                t,
                if path.contains(&i) { " <==" } else { "" }
            ),
            None => trace!(document = %document, "{}.{}\t{:.3}\t-", t, y, score),
        }
    }
}

// ============================================================================
// Learner
// ============================================================================

/// Mistakes made by the decoder during one training epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
}

impl EpochStats {
    pub fn mistakes(&self) -> usize {
        self.false_positives + self.false_negatives
    }
}

/// Binary training example for `span`, with the class of the segment
/// before it as history
fn segment_example(
    labels: &dyn TextLabels,
    fe: &dyn SpanFeatureExtractor,
    span: &Span,
    previous: Option<&Span>,
    positive: bool,
) -> Example {
    let last = match previous {
        Some(prev) if prev.is_followed_by(span) => POS_CLASS,
        _ => NEG_CLASS,
    };
    Example::binary(fe.extract(labels, span).with_history(&[last]), positive)
}

/// Structured perceptron trainer for the semi-Markov decoder
pub struct SegmentLearner {
    fe: Arc<dyn SpanFeatureExtractor>,
    learner: Box<dyn OnlineBinaryLearner>,
    epochs: usize,
    max_segment_size: usize,
    annotation_type: String,
    examples: Vec<(AnnotationExample, Segments)>,
    pool: VecDeque<Span>,
    stats: Vec<EpochStats>,
}

impl SegmentLearner {
    pub fn new(
        fe: Arc<dyn SpanFeatureExtractor>,
        learner: Box<dyn OnlineBinaryLearner>,
        epochs: usize,
        max_segment_size: usize,
    ) -> Self {
        Self {
            fe,
            learner,
            epochs,
            max_segment_size,
            annotation_type: "_prediction".to_string(),
            examples: Vec::new(),
            pool: VecDeque::new(),
            stats: Vec::new(),
        }
    }

    /// Segment features and a perceptron, sized from the configuration
    pub fn from_config(config: &SegmentConfig) -> Self {
        Self::new(
            Arc::new(SegmentFeatures::new(config.window_size)),
            Box::new(Perceptron::new()),
            config.epochs,
            config.max_segment_size,
        )
    }

    /// Per-epoch mistake counts of the last training run
    pub fn epoch_stats(&self) -> &[EpochStats] {
        &self.stats
    }

    /// Run the structured training loop over the accepted examples
    pub fn train(&mut self) {
        self.learner.reset();
        self.stats.clear();
        for epoch in 0..self.epochs {
            let mut stats = EpochStats {
                epoch,
                false_positives: 0,
                false_negatives: 0,
            };

            for (example, correct) in &self.examples {
                let labels = example.labels().as_ref();
                let decoded = best_segments(
                    example.document_span(),
                    labels,
                    self.fe.as_ref(),
                    self.learner.scorer(),
                    self.max_segment_size,
                );

                let mut previous: Option<&Span> = None;
                for span in decoded.iter() {
                    if !correct.contains(span) {
                        let ex = segment_example(labels, self.fe.as_ref(), span, previous, false);
                        self.learner.add_example(&ex);
                        stats.false_positives += 1;
                    }
                    previous = Some(span);
                }

                let mut previous: Option<&Span> = None;
                for span in correct.iter() {
                    if !decoded.contains(span) {
                        let ex = segment_example(labels, self.fe.as_ref(), span, previous, true);
                        self.learner.add_example(&ex);
                        stats.false_negatives += 1;
                    }
                    previous = Some(span);
                }
            }

            info!(
                epoch,
                false_positives = stats.false_positives,
                false_negatives = stats.false_negatives,
                "Segment training epoch"
            );
            self.stats.push(stats);
        }
    }
}

impl AnnotatorLearner for SegmentLearner {
    fn reset(&mut self) {
        self.learner.reset();
        self.examples.clear();
        self.pool.clear();
        self.stats.clear();
    }

    fn set_document_pool(&mut self, documents: Vec<Span>) {
        self.pool = documents.into();
    }

    fn has_next_query(&self) -> bool {
        !self.pool.is_empty()
    }

    fn next_query(&mut self) -> Option<Span> {
        self.pool.pop_front()
    }

    fn set_answer(&mut self, answer: AnnotationExample) -> Result<()> {
        let spans = answer
            .target()
            .spans(answer.labels().as_ref(), answer.document_id());
        if let Some(span) = spans.iter().find(|s| s.is_empty()) {
            return Err(SegtagError::EmptySpan(span.to_string()));
        }
        for span in spans.iter().filter(|s| s.len() > self.max_segment_size) {
            debug!(
                span = %span,
                max_segment_size = self.max_segment_size,
                "Segment longer than the decoder can produce"
            );
        }
        self.examples.push((answer, Segments::new(spans)));
        Ok(())
    }

    fn set_annotation_type(&mut self, span_type: &str) {
        self.annotation_type = span_type.to_string();
    }

    fn annotation_type(&self) -> &str {
        &self.annotation_type
    }

    fn annotator(&mut self) -> Result<Box<dyn Annotator>> {
        self.train();
        Ok(Box::new(SegmentAnnotator {
            classifier: self.learner.snapshot(),
            fe: self.fe.clone(),
            max_segment_size: self.max_segment_size,
            annotation_type: self.annotation_type.clone(),
        }))
    }
}

// ============================================================================
// Annotator
// ============================================================================

/// Annotates documents with the segments the decoder keeps
pub struct SegmentAnnotator {
    classifier: Arc<dyn BinaryClassifier>,
    fe: Arc<dyn SpanFeatureExtractor>,
    max_segment_size: usize,
    annotation_type: String,
}

impl SegmentAnnotator {
    pub fn new(
        classifier: Arc<dyn BinaryClassifier>,
        fe: Arc<dyn SpanFeatureExtractor>,
        max_segment_size: usize,
        annotation_type: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            fe,
            max_segment_size,
            annotation_type: annotation_type.into(),
        }
    }

    /// Decoded segments of one document
    pub fn segments(&self, labels: &dyn TextLabels, document: &Span) -> Segments {
        best_segments(
            document,
            labels,
            self.fe.as_ref(),
            self.classifier.as_ref(),
            self.max_segment_size,
        )
    }
}

impl Annotator for SegmentAnnotator {
    fn span_type(&self) -> &str {
        &self.annotation_type
    }

    fn annotate_documents(
        &self,
        labels: SharedLabels,
        documents: &[Span],
    ) -> Result<NestedLabels> {
        let mut view = NestedLabels::new(labels.clone());
        for document in documents {
            let segments = self.segments(labels.as_ref(), document);
            debug!(document = %document, segments = segments.len(), "Annotated document");
            for span in segments {
                view.add_to_type(span, &self.annotation_type);
            }
        }
        Ok(view)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Instance;
    use segtag_core::{BasicLabels, TextBase};
    use std::collections::HashMap;

    /// Features: the segment text only
    struct TextFeature;

    impl SpanFeatureExtractor for TextFeature {
        fn extract(&self, labels: &dyn TextLabels, span: &Span) -> Instance {
            let mut instance = Instance::new();
            instance.add_binary(format!("text={}", labels.text_base().span_tokens(span).join(" ")));
            instance
        }
    }

    /// Scores segments by text, ignoring history
    struct TableScorer(HashMap<String, f64>);

    impl BinaryClassifier for TableScorer {
        fn score(&self, instance: &Instance) -> f64 {
            instance
                .features()
                .filter_map(|(name, _)| self.0.get(name))
                .sum()
        }
    }

    fn scorer(entries: &[(&str, f64)]) -> TableScorer {
        TableScorer(
            entries
                .iter()
                .map(|(text, score)| (format!("text={}", text), *score))
                .collect(),
        )
    }

    fn labels(tokens: &[&str]) -> BasicLabels {
        let mut base = TextBase::new();
        base.add_tokens("d", tokens);
        BasicLabels::new(Arc::new(base))
    }

    #[test]
    fn test_picks_best_segments() {
        let labels = labels(&["a", "b", "c", "d"]);
        let doc = Span::new("d", 0, 4);
        let scorer = scorer(&[("a b", 2.0), ("b c", 3.0), ("d", 1.0), ("c", -1.0)]);

        let segments = best_segments(&doc, &labels, &TextFeature, &scorer, 3);
        let spans: Vec<Span> = segments.into_iter().collect();
        assert_eq!(spans, vec![Span::new("d", 1, 2), Span::new("d", 3, 1)]);
    }

    #[test]
    fn test_respects_max_segment_size() {
        let labels = labels(&["a", "b", "c"]);
        let doc = Span::new("d", 0, 3);
        let scorer = scorer(&[("a b c", 10.0), ("a", 1.0)]);

        let spans: Vec<Span> = best_segments(&doc, &labels, &TextFeature, &scorer, 2)
            .into_iter()
            .collect();
        assert_eq!(spans, vec![Span::new("d", 0, 1)]);
    }

    #[test]
    fn test_zero_scores_prefer_null() {
        let labels = labels(&["a", "b"]);
        let doc = Span::new("d", 0, 2);
        let segments = best_segments(&doc, &labels, &TextFeature, &scorer(&[]), 2);
        assert!(segments.is_empty());
    }

    #[test]
    fn test_empty_document() {
        let labels = labels(&[]);
        let doc = Span::new("d", 0, 0);
        assert!(best_segments(&doc, &labels, &TextFeature, &scorer(&[]), 3).is_empty());
    }

    #[test]
    fn test_segment_example_history() {
        let labels = labels(&["a", "b", "c"]);
        let first = Span::new("d", 0, 1);
        let second = Span::new("d", 1, 2);

        let adjacent = segment_example(&labels, &TextFeature, &second, Some(&first), true);
        assert_eq!(adjacent.instance.weight("history.1.POS"), 1.0);
        assert!(adjacent.is_positive());

        let apart = segment_example(&labels, &TextFeature, &Span::new("d", 2, 1), Some(&first), false);
        assert_eq!(apart.instance.weight("history.1.NEG"), 1.0);

        let none = segment_example(&labels, &TextFeature, &first, None, false);
        assert_eq!(none.instance.weight("history.1.NEG"), 1.0);
    }

    #[test]
    fn test_annotator_retrains_from_scratch() {
        let mut store = labels(&["a", "X", "b"]);
        store.add_to_type(Span::new("d", 1, 1), "T");
        let shared: SharedLabels = Arc::new(store);

        let mut learner = SegmentLearner::new(
            Arc::new(TextFeature),
            Box::new(Perceptron::new()),
            1,
            2,
        );
        learner
            .set_answer(AnnotationExample::new(
                Span::new("d", 0, 3),
                shared.clone(),
                crate::ExtractionTarget::Type("T".to_string()),
            ))
            .unwrap();

        let first = learner.annotator().unwrap().annotate(shared.clone()).unwrap();
        let first_stats = learner.epoch_stats().to_vec();
        assert!(first_stats[0].mistakes() > 0);

        let second = learner.annotator().unwrap().annotate(shared).unwrap();
        assert_eq!(learner.epoch_stats(), first_stats.as_slice());
        let output = learner.annotation_type().to_string();
        assert_eq!(second.instances(&output, "d"), first.instances(&output, "d"));
    }

    #[test]
    fn test_empty_target_span_is_rejected() {
        let mut store = labels(&["a", "b"]);
        store.add_to_type(Span::new("d", 1, 0), "T");
        let shared: SharedLabels = Arc::new(store);
        let example = AnnotationExample::new(
            Span::new("d", 0, 2),
            shared,
            crate::ExtractionTarget::Type("T".to_string()),
        );

        let mut learner = SegmentLearner::from_config(&SegmentConfig::default());
        assert!(matches!(
            learner.set_answer(example),
            Err(SegtagError::EmptySpan(_))
        ));
    }
}
