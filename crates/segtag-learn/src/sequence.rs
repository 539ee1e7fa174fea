//! Sequence learning over reduced documents
//!
//! `SequenceAnnotatorLearner` reduces every answered document to one tag per
//! token, pairs each tag with the token's features, and trains a batch
//! sequence classifier on the collected sequences. The resulting
//! `SequenceAnnotator` classifies each document's tokens in one call and
//! decodes the predicted tags back into spans.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use segtag_core::{
    AppConfig, MonotonicTextLabels, NestedLabels, Result, SharedLabels, Span, TextLabels,
};

use crate::classify::{
    BatchSequenceLearner, ClassLabel, Example, Instance, SequenceClassifier, SequenceDataset,
};
use crate::features::{SpanFeatureExtractor, TokenFeatures};
use crate::perceptron::GreedyCmmLearner;
use crate::reduction::Reduction;
use crate::{AnnotationExample, Annotator, AnnotatorLearner, ExtractionTarget};

// ============================================================================
// Reduction to Sequences
// ============================================================================

/// Reduce one example and pair each token's features with its tag.
///
/// Returns `None` when some token of the document has no tag; such
/// documents are never trained on.
pub fn sequence_for(
    example: &AnnotationExample,
    fe: &dyn SpanFeatureExtractor,
    reduction: &mut Reduction,
) -> Result<Option<Vec<Example>>> {
    reduction.reduce(example)?;
    let Some(view) = reduction.tagged_view() else {
        return Ok(None);
    };

    let document = example.document_span();
    let mut sequence = Vec::with_capacity(document.len());
    for (i, token) in document.tokens().enumerate() {
        let Some(tag) = view.token_property(&token, reduction.token_tag_property()) else {
            warn!(
                document = example.document_id(),
                token = token.index,
                "Token has no tag, skipping document"
            );
            return Ok(None);
        };
        let instance = fe.extract(example.labels().as_ref(), &document.sub_span(i, 1));
        sequence.push(Example::new(instance, tag));
    }
    Ok(Some(sequence))
}

/// Reduce every document of a label store into a sequence dataset.
///
/// Documents that fail to reduce or are only partly tagged are left out.
pub fn prepare_sequence_data(
    labels: SharedLabels,
    target: &ExtractionTarget,
    fe: &dyn SpanFeatureExtractor,
    history_size: usize,
    reduction: &mut Reduction,
) -> SequenceDataset {
    let mut data = SequenceDataset::new(history_size);
    for document in labels.text_base().document_spans() {
        let example = AnnotationExample::new(document, labels.clone(), target.clone());
        match sequence_for(&example, fe, reduction) {
            Ok(Some(sequence)) => data.add_sequence(sequence),
            Ok(None) => {}
            Err(e) => error!(
                document = example.document_id(),
                error = %e,
                "Failed to reduce document"
            ),
        }
    }
    info!(
        target = %target,
        sequences = data.len(),
        examples = data.num_examples(),
        "Prepared sequence data"
    );
    data
}

// ============================================================================
// Learner
// ============================================================================

/// Collects reduced sequences and trains a sequence classifier on them
pub struct SequenceAnnotatorLearner {
    fe: Arc<dyn SpanFeatureExtractor>,
    learner: Box<dyn BatchSequenceLearner>,
    reduction: Reduction,
    annotation_type: String,
    dataset: SequenceDataset,
    pool: VecDeque<Span>,
    skipped: usize,
}

impl SequenceAnnotatorLearner {
    pub fn new(
        fe: Arc<dyn SpanFeatureExtractor>,
        learner: Box<dyn BatchSequenceLearner>,
        reduction: Reduction,
        history_size: usize,
    ) -> Self {
        Self {
            fe,
            learner,
            reduction,
            annotation_type: "_prediction".to_string(),
            dataset: SequenceDataset::new(history_size),
            pool: VecDeque::new(),
            skipped: 0,
        }
    }

    /// Token features, a CMM and the configured reduction
    pub fn from_config(config: &AppConfig) -> Self {
        let mut learner = Self::new(
            Arc::new(TokenFeatures::new(config.sequence.window_size)),
            Box::new(GreedyCmmLearner::new(config.sequence.epochs)),
            Reduction::from_config(&config.reduction),
            config.sequence.history_size,
        );
        learner.set_annotation_type(&config.experiment.output_type);
        learner
    }

    /// Sequences accepted so far
    pub fn dataset(&self) -> &SequenceDataset {
        &self.dataset
    }

    /// Documents dropped because some token had no tag
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn reduction(&self) -> &Reduction {
        &self.reduction
    }

    /// Train on the accepted sequences.
    ///
    /// A dataset with fewer than two classes is logged and trained anyway.
    pub fn sequence_annotator(&mut self) -> Result<SequenceAnnotator> {
        if let Err(e) = self.dataset.schema().validate() {
            error!(error = %e, "Training a degenerate sequence classifier");
        }
        if self.skipped > 0 {
            warn!(skipped = self.skipped, "Some documents were not trained on");
        }
        let classifier = self.learner.batch_train(&self.dataset)?;
        Ok(SequenceAnnotator::new(
            classifier,
            self.fe.clone(),
            self.reduction.without_view(),
            self.annotation_type.clone(),
        ))
    }
}

impl AnnotatorLearner for SequenceAnnotatorLearner {
    fn reset(&mut self) {
        self.dataset = SequenceDataset::new(self.dataset.history_size);
        self.pool.clear();
        self.skipped = 0;
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
        match sequence_for(&answer, self.fe.as_ref(), &mut self.reduction)? {
            Some(sequence) => {
                debug!(
                    document = answer.document_id(),
                    tokens = sequence.len(),
                    "Accepted sequence"
                );
                self.dataset.add_sequence(sequence);
            }
            None => self.skipped += 1,
        }
        Ok(())
    }

    fn set_annotation_type(&mut self, span_type: &str) {
        self.annotation_type = span_type.to_string();
    }

    fn annotation_type(&self) -> &str {
        &self.annotation_type
    }

    fn annotator(&mut self) -> Result<Box<dyn Annotator>> {
        Ok(Box::new(self.sequence_annotator()?))
    }
}

// ============================================================================
// Annotator
// ============================================================================

/// Tags documents with a trained sequence classifier and decodes the tags
#[derive(Clone)]
pub struct SequenceAnnotator {
    classifier: Arc<dyn SequenceClassifier>,
    fe: Arc<dyn SpanFeatureExtractor>,
    reduction: Reduction,
    annotation_type: String,
}

impl SequenceAnnotator {
    pub fn new(
        classifier: Arc<dyn SequenceClassifier>,
        fe: Arc<dyn SpanFeatureExtractor>,
        reduction: Reduction,
        annotation_type: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            fe,
            reduction,
            annotation_type: annotation_type.into(),
        }
    }

    pub fn classifier(&self) -> &Arc<dyn SequenceClassifier> {
        &self.classifier
    }

    pub fn reduction(&self) -> &Reduction {
        &self.reduction
    }

    /// Token instances of a document and the classes predicted for them
    pub fn classify_document(
        &self,
        labels: &dyn TextLabels,
        document: &Span,
    ) -> (Vec<Instance>, Vec<ClassLabel>) {
        let instances: Vec<Instance> = (0..document.len())
            .map(|i| self.fe.extract(labels, &document.sub_span(i, 1)))
            .collect();
        let predicted = self.classifier.classification(&instances);
        (instances, predicted)
    }

    /// Write predicted tags for one document into `view`
    pub fn tag_document(&self, view: &mut NestedLabels, document: &Span, predicted: &[ClassLabel]) {
        for (i, label) in predicted.iter().enumerate() {
            view.set_token_property(
                &document.token(i),
                self.reduction.token_tag_property(),
                &label.label,
            );
        }
    }
}

impl Annotator for SequenceAnnotator {
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
            let (_, predicted) = self.classify_document(labels.as_ref(), document);
            self.tag_document(&mut view, document, &predicted);
        }
        let spans = self
            .reduction
            .decode_documents(&self.annotation_type, &mut view, documents)?;
        debug!(
            documents = documents.len(),
            spans,
            "Annotated documents"
        );
        Ok(view)
    }
}

// ============================================================================
// Tests
// ============================================================================
