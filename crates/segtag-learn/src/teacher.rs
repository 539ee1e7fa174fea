//! Teacher side of the training protocol
//!
//! A teacher hands a learner its document pool, then answers each query with
//! an `AnnotationExample` until the learner stops asking.

use tracing::{debug, error, info};

use segtag_core::{Result, SegtagError, SharedLabels, Span};

use crate::{AnnotationExample, Annotator, AnnotatorLearner, ExtractionTarget};

/// Answers a learner's queries about documents
pub trait AnnotatorTeacher {
    /// Documents offered to the learner
    fn documents(&self) -> Vec<Span>;

    /// Supervision for one queried document
    fn label(&self, document: &Span) -> Result<AnnotationExample>;

    /// Reset the learner and answer its queries until it stops asking.
    /// Returns the number of accepted answers.
    ///
    /// A document whose answer the learner rejects is logged and skipped.
    fn answer_queries(&self, learner: &mut dyn AnnotatorLearner) -> Result<usize> {
        learner.reset();
        learner.set_document_pool(self.documents());

        let mut answered = 0;
        let mut rejected = 0;
        while learner.has_next_query() {
            let Some(document) = learner.next_query() else {
                break;
            };
            let answer = self.label(&document)?;
            match learner.set_answer(answer) {
                Ok(()) => {
                    answered += 1;
                    debug!(document = %document, "Answered query");
                }
                Err(e) => {
                    rejected += 1;
                    error!(document = %document, error = %e, "Skipping document");
                }
            }
        }

        info!(answered, rejected, "Finished answering queries");
        Ok(answered)
    }

    /// Run the query/answer loop and return the trained annotator
    fn train(&self, learner: &mut dyn AnnotatorLearner) -> Result<Box<dyn Annotator>> {
        self.answer_queries(learner)?;
        learner.annotator()
    }
}

/// Teacher that answers from an annotated label store
pub struct TextLabelsTeacher {
    labels: SharedLabels,
    target: ExtractionTarget,
    documents: Vec<Span>,
}

impl TextLabelsTeacher {
    /// Teach every document of the store
    pub fn new(labels: SharedLabels, target: ExtractionTarget) -> Self {
        let documents = labels.text_base().document_spans();
        Self {
            labels,
            target,
            documents,
        }
    }

    /// Teach only the given documents
    pub fn with_documents(mut self, documents: Vec<Span>) -> Self {
        self.documents = documents;
        self
    }

    pub fn target(&self) -> &ExtractionTarget {
        &self.target
    }
}

impl AnnotatorTeacher for TextLabelsTeacher {
    fn documents(&self) -> Vec<Span> {
        self.documents.clone()
    }

    fn label(&self, document: &Span) -> Result<AnnotationExample> {
        let full = self
            .labels
            .text_base()
            .document_span(document.document_id())
            .ok_or_else(|| SegtagError::UnknownDocument(document.document_id().to_string()))?;
        Ok(AnnotationExample::new(
            full,
            self.labels.clone(),
            self.target.clone(),
        ))
    }
}
