//! Confidence-reporting annotation
//!
//! Wraps a `SequenceAnnotator` and attaches `Details` to every extracted
//! span. The confidence is the classifier's score gap between its labeling
//! and the best labeling with the span forced to the default tag; classifiers
//! that cannot compare paths fall back to the summed token weights.

use tracing::debug;

use segtag_core::{Details, MonotonicTextLabels, NestedLabels, Result, SharedLabels, Span};

use crate::classify::sum_predicted_weights;
use crate::reduction::DEFAULT_TAG;
use crate::sequence::SequenceAnnotator;
use crate::Annotator;

const SOURCE: &str = "sequence";

/// Sequence annotator that records provenance for each span it emits
#[derive(Clone)]
pub struct ConfidenceReportingAnnotator {
    inner: SequenceAnnotator,
}

impl ConfidenceReportingAnnotator {
    pub fn new(inner: SequenceAnnotator) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &SequenceAnnotator {
        &self.inner
    }
}

impl Annotator for ConfidenceReportingAnnotator {
    fn span_type(&self) -> &str {
        self.inner.span_type()
    }

    fn annotate_documents(
        &self,
        labels: SharedLabels,
        documents: &[Span],
    ) -> Result<NestedLabels> {
        let reduction = self.inner.reduction();
        let classifier = self.inner.classifier();
        let mut view = NestedLabels::new(labels.clone());

        for document in documents {
            labels.text_base().validate(document)?;
            let (instances, predicted) = self.inner.classify_document(labels.as_ref(), document);
            self.inner.tag_document(&mut view, document, &predicted);

            for (span, value) in reduction.decode_document(&view, document) {
                let lo = span.start() - document.start();
                let hi = lo + span.len();
                let predicted_weight = sum_predicted_weights(&predicted, lo, hi);

                let alternate: Vec<Option<String>> = (0..predicted.len())
                    .map(|i| (lo..hi).contains(&i).then(|| DEFAULT_TAG.to_string()))
                    .collect();
                let confidence = classifier
                    .confidence(&instances, &predicted, &alternate)
                    .unwrap_or(predicted_weight);

                debug!(span = %span, confidence, predicted_weight, "Extracted span");
                if let Some(value) = value {
                    view.set_span_property(&span, reduction.class_property(), &value);
                }
                view.add_to_type_with_details(
                    span,
                    self.span_type(),
                    Details {
                        confidence,
                        predicted_weight,
                        source: SOURCE.to_string(),
                    },
                );
            }
        }
        Ok(view)
    }
}
