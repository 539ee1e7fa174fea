//! Segtag Learn - Learning span extractors
//!
//! Reduces span extraction to token tagging (and back), trains sequence
//! annotators over the reduced data, and decodes documents into segments
//! with a conditional semi-Markov model.

use segtag_core::{NestedLabels, Result, SegtagError, SharedLabels, Span, TextLabels};

pub mod classify;
pub mod confidence;
pub mod experiment;
pub mod features;
pub mod metrics;
pub mod perceptron;
pub mod reduction;
pub mod semi_markov;
pub mod sequence;
pub mod teacher;

/// What an annotation example asks a learner to extract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionTarget {
    /// Spans of this type; the class name is the type itself
    Type(String),
    /// Spans carrying this property; the class name is the property value
    Property(String),
}

impl ExtractionTarget {
    /// Build a target from an optional type and an optional property, exactly
    /// one of which must be given
    pub fn from_signal(span_type: Option<&str>, span_property: Option<&str>) -> Result<Self> {
        match (span_type, span_property) {
            (Some(t), None) => Ok(Self::Type(t.to_string())),
            (None, Some(p)) => Ok(Self::Property(p.to_string())),
            (Some(t), Some(p)) => Err(SegtagError::AmbiguousTarget {
                span_type: t.to_string(),
                span_property: p.to_string(),
            }),
            (None, None) => Err(SegtagError::MissingTarget("<any>".to_string())),
        }
    }

    /// Positive spans of this target in one document
    pub fn spans(&self, labels: &dyn TextLabels, document_id: &str) -> Vec<Span> {
        match self {
            Self::Type(t) => labels.instances(t, document_id).into_iter().collect(),
            Self::Property(p) => labels
                .spans_with_property(p, document_id)
                .into_iter()
                .collect(),
        }
    }
}

impl std::fmt::Display for ExtractionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Type(t) => write!(f, "type:{}", t),
            Self::Property(p) => write!(f, "property:{}", p),
        }
    }
}

/// One unit of supervision: a document, the labels answering for it, and
/// the target to extract
#[derive(Clone)]
pub struct AnnotationExample {
    document: Span,
    labels: SharedLabels,
    target: ExtractionTarget,
}

impl AnnotationExample {
    pub fn new(document: Span, labels: SharedLabels, target: ExtractionTarget) -> Self {
        Self {
            document,
            labels,
            target,
        }
    }

    pub fn document_span(&self) -> &Span {
        &self.document
    }

    pub fn document_id(&self) -> &str {
        self.document.document_id()
    }

    pub fn labels(&self) -> &SharedLabels {
        &self.labels
    }

    pub fn target(&self) -> &ExtractionTarget {
        &self.target
    }

    /// Class name of a span under this example's target
    pub fn class_name(&self, span: &Span) -> Option<String> {
        match &self.target {
            ExtractionTarget::Type(t) => self.labels.has_type(span, t).then(|| t.clone()),
            ExtractionTarget::Property(p) => {
                self.labels.span_property(span, p).map(str::to_string)
            }
        }
    }

    /// Positive spans in the document paired with their class names
    pub fn positive_spans(&self) -> Result<Vec<(Span, String)>> {
        self.target
            .spans(self.labels.as_ref(), self.document_id())
            .into_iter()
            .map(|span| {
                let class = self
                    .class_name(&span)
                    .ok_or_else(|| SegtagError::MissingTarget(span.to_string()))?;
                Ok((span, class))
            })
            .collect()
    }
}

impl std::fmt::Debug for AnnotationExample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationExample")
            .field("document", &self.document)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// A trained extractor that writes spans into a fresh view of a label store
pub trait Annotator: Send + Sync {
    /// Type of the spans this annotator produces
    fn span_type(&self) -> &str;

    /// Annotate the given documents, returning a view over `labels`
    fn annotate_documents(
        &self,
        labels: SharedLabels,
        documents: &[Span],
    ) -> Result<NestedLabels>;

    /// Annotate every document of the store
    fn annotate(&self, labels: SharedLabels) -> Result<NestedLabels> {
        let documents = labels.text_base().document_spans();
        self.annotate_documents(labels, &documents)
    }
}

/// Learner side of the query/answer training protocol
pub trait AnnotatorLearner {
    /// Clear all accumulated training state
    fn reset(&mut self);

    /// Accept the pool of unlabeled documents
    fn set_document_pool(&mut self, documents: Vec<Span>);

    fn has_next_query(&self) -> bool;

    /// Next document the learner wants labeled
    fn next_query(&mut self) -> Option<Span>;

    /// Accept the answer to the last query
    fn set_answer(&mut self, answer: AnnotationExample) -> Result<()>;

    fn set_annotation_type(&mut self, span_type: &str);

    fn annotation_type(&self) -> &str;

    /// Train on everything accepted so far and return the learned annotator
    fn annotator(&mut self) -> Result<Box<dyn Annotator>>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use segtag_core::{BasicLabels, MonotonicTextLabels, TextBase};
    use std::sync::Arc;

    fn labels() -> SharedLabels {
        let mut base = TextBase::new();
        base.add_tokens("d", &["Ann", "met", "Bob"]);
        let mut labels = BasicLabels::new(Arc::new(base));
        labels.add_to_type(Span::new("d", 0, 1), "person");
        labels.add_to_type(Span::new("d", 2, 1), "person");
        labels.set_span_property(&Span::new("d", 2, 1), "kind", "MALE");
        Arc::new(labels)
    }

    #[test]
    fn test_target_from_signal() {
        assert_eq!(
            ExtractionTarget::from_signal(Some("person"), None).unwrap(),
            ExtractionTarget::Type("person".to_string())
        );
        assert!(matches!(
            ExtractionTarget::from_signal(Some("a"), Some("b")),
            Err(SegtagError::AmbiguousTarget { .. })
        ));
        assert!(matches!(
            ExtractionTarget::from_signal(None, None),
            Err(SegtagError::MissingTarget(_))
        ));
    }

    #[test]
    fn test_positive_spans_by_type() {
        let example = AnnotationExample::new(
            Span::new("d", 0, 3),
            labels(),
            ExtractionTarget::Type("person".to_string()),
        );
        let spans = example.positive_spans().unwrap();
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|(_, class)| class == "person"));
    }

    #[test]
    fn test_positive_spans_by_property() {
        let example = AnnotationExample::new(
            Span::new("d", 0, 3),
            labels(),
            ExtractionTarget::Property("kind".to_string()),
        );
        let spans = example.positive_spans().unwrap();
        assert_eq!(spans, vec![(Span::new("d", 2, 1), "MALE".to_string())]);
    }
}
