//! Extraction-to-tagging reductions
//!
//! A `Reduction` turns the positive spans of an `AnnotationExample` into one
//! tag per token, written under a token property of a fresh `NestedLabels`
//! view, and turns tag sequences back into spans. Three schemes share the
//! same default-then-positive labeling and differ only in the markers they
//! emit and the runs they accept when decoding:
//!
//! | Scheme | Span of length L | Decoded from |
//! |---|---|---|
//! | `InsideOutside` | `inside` × L | maximal run of one inside tag |
//! | `BeginContinueOutside` | `Begin`, `Continue` × (L-1) | `Begin Continue*` |
//! | `BeginContinueEndUnique` | `Unique` (L=1) or `Begin`, `Continue` × (L-2), `End` | `Unique` or `Begin Continue* End` |
//!
//! Tokens outside every positive span get `outside`. Property targets append
//! the value to the marker (`inside-PER`, `Begin-PER`). Under `InsideOutside`
//! two adjacent spans of the same class decode as one span.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use segtag_core::{
    MonotonicTextLabels, NestedLabels, ReductionConfig, Result, SegtagError, Span, TaggingScheme,
    TextLabels, Token,
};

use crate::{AnnotationExample, ExtractionTarget};

/// Tag of tokens outside every positive span
pub const DEFAULT_TAG: &str = "outside";

/// Span property that receives decoded property values when the reduction
/// never saw a property target
pub const DEFAULT_CLASS_PROPERTY: &str = "class";

// ============================================================================
// Tags
// ============================================================================

/// Position of a token inside a tagged span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Marker {
    Inside,
    Begin,
    Continue,
    End,
    Unique,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inside => "inside",
            Self::Begin => "Begin",
            Self::Continue => "Continue",
            Self::End => "End",
            Self::Unique => "Unique",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "inside" => Some(Self::Inside),
            "Begin" => Some(Self::Begin),
            "Continue" => Some(Self::Continue),
            "End" => Some(Self::End),
            "Unique" => Some(Self::Unique),
            _ => None,
        }
    }

    /// Markers a scheme emits
    pub fn for_scheme(scheme: TaggingScheme) -> &'static [Marker] {
        match scheme {
            TaggingScheme::InsideOutside => &[Self::Inside],
            TaggingScheme::BeginContinueOutside => &[Self::Begin, Self::Continue],
            TaggingScheme::BeginContinueEndUnique => {
                &[Self::Begin, Self::Continue, Self::End, Self::Unique]
            }
        }
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One distinguished target class
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BaseTag {
    /// Spans of a type; tags carry only the marker
    Type(String),
    /// Spans with a property value; tags carry the value
    Value(String),
}

impl BaseTag {
    fn value(&self) -> Option<&str> {
        match self {
            Self::Type(_) => None,
            Self::Value(v) => Some(v),
        }
    }
}

/// A parsed non-default tag
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    marker: Marker,
    value: Option<String>,
}

// ============================================================================
// Reduction
// ============================================================================

/// Encoder/decoder between span supervision and token tags.
///
/// The tag vocabulary grows with every `reduce` and is never cleared. Only
/// the most recent tagged view is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reduction {
    scheme: TaggingScheme,
    token_property: String,
    vocabulary: BTreeSet<BaseTag>,
    span_property: Option<String>,
    #[serde(skip)]
    tagged: Option<NestedLabels>,
}

impl Reduction {
    pub fn new(scheme: TaggingScheme, token_property: impl Into<String>) -> Self {
        Self {
            scheme,
            token_property: token_property.into(),
            vocabulary: BTreeSet::new(),
            span_property: None,
            tagged: None,
        }
    }

    pub fn from_config(config: &ReductionConfig) -> Self {
        Self::new(config.scheme, config.token_property.clone())
    }

    pub fn scheme(&self) -> TaggingScheme {
        self.scheme
    }

    /// Token property the tags are written under
    pub fn token_tag_property(&self) -> &str {
        &self.token_property
    }

    /// Every base tag seen by this reduction so far
    pub fn tag_vocabulary(&self) -> &BTreeSet<BaseTag> {
        &self.vocabulary
    }

    /// View produced by the last successful `reduce`
    pub fn tagged_view(&self) -> Option<&NestedLabels> {
        self.tagged.as_ref()
    }

    /// Copy of this reduction without the last tagged view
    pub fn without_view(&self) -> Self {
        Self {
            scheme: self.scheme,
            token_property: self.token_property.clone(),
            vocabulary: self.vocabulary.clone(),
            span_property: self.span_property.clone(),
            tagged: None,
        }
    }

    /// Every tag string this reduction can emit, including the default
    pub fn class_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::from([DEFAULT_TAG.to_string()]);
        for base in &self.vocabulary {
            for marker in Marker::for_scheme(self.scheme) {
                names.insert(self.render(*marker, base));
            }
        }
        names
    }

    /// Tag the example's document.
    ///
    /// Fails with `EmptySpan` before writing anything when a positive span is
    /// empty; the previous tagged view is discarded either way.
    pub fn reduce(&mut self, example: &AnnotationExample) -> Result<()> {
        self.tagged = None;

        let positives = example.positive_spans()?;
        if let Some((span, _)) = positives.iter().find(|(span, _)| span.is_empty()) {
            return Err(SegtagError::EmptySpan(span.to_string()));
        }

        if let ExtractionTarget::Property(prop) = example.target() {
            self.span_property = Some(prop.clone());
        }
        let mut view = NestedLabels::new(example.labels().clone());
        self.assign_default_labels(&mut view, example);

        for (span, class) in positives {
            let base = match example.target() {
                ExtractionTarget::Type(_) => BaseTag::Type(class),
                ExtractionTarget::Property(_) => BaseTag::Value(class),
            };
            self.tag_span(&mut view, &span, &base);
            self.vocabulary.insert(base);
        }

        debug!(
            document = example.document_id(),
            scheme = %self.scheme,
            vocabulary = self.vocabulary.len(),
            "Reduced document"
        );
        self.tagged = Some(view);
        Ok(())
    }

    /// Type targets default only the tokens inside the type's closure;
    /// property targets default the whole document.
    fn assign_default_labels(&self, view: &mut NestedLabels, example: &AnnotationExample) {
        match example.target() {
            ExtractionTarget::Type(span_type) => {
                let closure = example.labels().closure(span_type, example.document_id());
                for span in closure {
                    for token in span.tokens() {
                        view.set_token_property(&token, &self.token_property, DEFAULT_TAG);
                    }
                }
            }
            ExtractionTarget::Property(_) => {
                for token in example.document_span().tokens() {
                    view.set_token_property(&token, &self.token_property, DEFAULT_TAG);
                }
            }
        }
    }

    fn tag_span(&self, view: &mut NestedLabels, span: &Span, base: &BaseTag) {
        let len = span.len();
        for (i, token) in span.tokens().enumerate() {
            let marker = match self.scheme {
                TaggingScheme::InsideOutside => Marker::Inside,
                TaggingScheme::BeginContinueOutside if i == 0 => Marker::Begin,
                TaggingScheme::BeginContinueOutside => Marker::Continue,
                TaggingScheme::BeginContinueEndUnique if len == 1 => Marker::Unique,
                TaggingScheme::BeginContinueEndUnique if i == 0 => Marker::Begin,
                TaggingScheme::BeginContinueEndUnique if i + 1 == len => Marker::End,
                TaggingScheme::BeginContinueEndUnique => Marker::Continue,
            };
            view.set_token_property(&token, &self.token_property, &self.render(marker, base));
        }
    }

    fn render(&self, marker: Marker, base: &BaseTag) -> String {
        match base {
            BaseTag::Type(_) => marker.as_str().to_string(),
            BaseTag::Value(v) => format!("{}-{}", marker, v),
        }
    }

    fn parse(&self, tag: &str) -> Option<ParsedTag> {
        if tag == DEFAULT_TAG {
            return None;
        }
        if let Some(marker) = Marker::parse(tag) {
            return Some(ParsedTag {
                marker,
                value: None,
            });
        }
        let (prefix, value) = tag.split_once('-')?;
        Some(ParsedTag {
            marker: Marker::parse(prefix)?,
            value: Some(value.to_string()),
        })
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    /// Spans encoded by the tags of one document, with their property value
    /// when the tags carry one. Incomplete runs are dropped.
    pub fn decode_document<L>(&self, labels: &L, document: &Span) -> Vec<(Span, Option<String>)>
    where
        L: TextLabels + ?Sized,
    {
        let doc_id = document.document_id();
        let tags: Vec<Option<ParsedTag>> = (document.start()..document.end())
            .map(|i| {
                labels
                    .token_property(&Token::new(doc_id, i), &self.token_property)
                    .and_then(|tag| self.parse(tag))
            })
            .collect();

        let mut spans = Vec::new();
        let mut emit = |lo: usize, hi: usize, value: Option<String>| {
            spans.push((Span::new(doc_id, document.start() + lo, hi - lo), value));
        };
        // Start and value of the span being read
        let mut open: Option<(usize, Option<String>)> = None;

        for (i, tag) in tags.into_iter().enumerate() {
            match self.scheme {
                TaggingScheme::InsideOutside => match tag {
                    Some(ParsedTag {
                        marker: Marker::Inside,
                        value,
                    }) => match open.take() {
                        Some((lo, current)) if current == value => open = Some((lo, current)),
                        Some((lo, current)) => {
                            emit(lo, i, current);
                            open = Some((i, value));
                        }
                        None => open = Some((i, value)),
                    },
                    _ => {
                        if let Some((lo, value)) = open.take() {
                            emit(lo, i, value);
                        }
                    }
                },
                TaggingScheme::BeginContinueOutside => {
                    let continues = matches!(
                        (&tag, &open),
                        (Some(ParsedTag { marker: Marker::Continue, value }), Some((_, current)))
                            if value == current
                    );
                    if continues {
                        continue;
                    }
                    if let Some((lo, value)) = open.take() {
                        emit(lo, i, value);
                    }
                    if let Some(ParsedTag {
                        marker: Marker::Begin,
                        value,
                    }) = tag
                    {
                        open = Some((i, value));
                    }
                }
                TaggingScheme::BeginContinueEndUnique => {
                    let current = open.take();
                    match tag {
                        Some(ParsedTag {
                            marker: Marker::Unique,
                            value,
                        }) => emit(i, i + 1, value),
                        Some(ParsedTag {
                            marker: Marker::Begin,
                            value,
                        }) => open = Some((i, value)),
                        Some(ParsedTag {
                            marker: Marker::Continue,
                            value,
                        }) => {
                            open = current.filter(|(_, v)| *v == value);
                        }
                        Some(ParsedTag {
                            marker: Marker::End,
                            value,
                        }) => {
                            if let Some((lo, v)) = current.filter(|(_, v)| *v == value) {
                                emit(lo, i + 1, v);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        if self.scheme != TaggingScheme::BeginContinueEndUnique {
            if let Some((lo, value)) = open {
                emit(lo, document.len(), value);
            }
        }
        spans
    }

    /// Decode the tags of every document in `labels` and add the spans to
    /// `output_type`. Returns the number of spans written.
    pub fn decode<L>(&self, output_type: &str, labels: &mut L) -> Result<usize>
    where
        L: MonotonicTextLabels + ?Sized,
    {
        let documents = labels.text_base().document_spans();
        self.decode_documents(output_type, labels, &documents)
    }

    /// `decode` restricted to the given documents
    pub fn decode_documents<L>(
        &self,
        output_type: &str,
        labels: &mut L,
        documents: &[Span],
    ) -> Result<usize>
    where
        L: MonotonicTextLabels + ?Sized,
    {
        let mut written = 0;
        for document in documents {
            labels.text_base().validate(document)?;
            for (span, value) in self.decode_document(&*labels, document) {
                if let Some(value) = value {
                    labels.set_span_property(&span, self.class_property(), &value);
                }
                labels.add_to_type(span, output_type);
                written += 1;
            }
        }
        debug!(output_type, spans = written, "Decoded tags");
        Ok(written)
    }

    /// Span property that receives decoded property values
    pub fn class_property(&self) -> &str {
        self.span_property
            .as_deref()
            .unwrap_or(DEFAULT_CLASS_PROPERTY)
    }

    /// Property values seen so far, in order
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.vocabulary.iter().filter_map(BaseTag::value)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use segtag_core::{BasicLabels, SharedLabels, TextBase};
    use std::sync::Arc;

    fn store(tokens: &[&str], spans: &[(usize, usize)], closed: bool) -> SharedLabels {
        let mut base = TextBase::new();
        base.add_tokens("d", tokens);
        let mut labels = BasicLabels::new(Arc::new(base));
        for &(lo, hi) in spans {
            labels.add_to_type(Span::new("d", lo, hi - lo), "T");
        }
        if closed {
            labels.close_type_everywhere("T");
        }
        Arc::new(labels)
    }

    fn example(labels: SharedLabels) -> AnnotationExample {
        let doc = labels.text_base().document_span("d").unwrap();
        AnnotationExample::new(doc, labels, ExtractionTarget::Type("T".to_string()))
    }

    fn tags(reduction: &Reduction, n: usize) -> Vec<Option<String>> {
        let view = reduction.tagged_view().unwrap();
        (0..n)
            .map(|i| {
                view.token_property(&Token::new("d", i), reduction.token_tag_property())
                    .map(str::to_string)
            })
            .collect()
    }

    fn some(tags: &[&str]) -> Vec<Option<String>> {
        tags.iter().map(|t| Some(t.to_string())).collect()
    }

    #[test]
    fn test_begin_continue_outside_tags() {
        let labels = store(&["A", "B", "C", "D"], &[(1, 3)], true);
        let mut reduction = Reduction::new(TaggingScheme::BeginContinueOutside, "_tag");
        reduction.reduce(&example(labels)).unwrap();

        assert_eq!(
            tags(&reduction, 4),
            some(&["outside", "Begin", "Continue", "outside"])
        );
    }

    #[test]
    fn test_begin_continue_end_unique_tags() {
        let labels = store(
            &["a", "b", "c", "d", "e", "f", "g", "h"],
            &[(0, 1), (2, 4), (5, 8)],
            true,
        );
        let mut reduction = Reduction::new(TaggingScheme::BeginContinueEndUnique, "_tag");
        reduction.reduce(&example(labels)).unwrap();

        assert_eq!(
            tags(&reduction, 8),
            some(&["Unique", "outside", "Begin", "End", "outside", "Begin", "Continue", "End"])
        );
    }

    #[test]
    fn test_inside_outside_property_values() {
        let mut base = TextBase::new();
        base.add_tokens("d", &["Ann", "met", "Bob", "Lee"]);
        let mut labels = BasicLabels::new(Arc::new(base));
        labels.set_span_property(&Span::new("d", 0, 1), "kind", "F");
        labels.set_span_property(&Span::new("d", 2, 2), "kind", "M");
        let labels: SharedLabels = Arc::new(labels);

        let example = AnnotationExample::new(
            Span::new("d", 0, 4),
            labels,
            ExtractionTarget::Property("kind".to_string()),
        );
        let mut reduction = Reduction::new(TaggingScheme::InsideOutside, "_tag");
        reduction.reduce(&example).unwrap();

        assert_eq!(
            tags(&reduction, 4),
            some(&["inside-F", "outside", "inside-M", "inside-M"])
        );
        assert_eq!(reduction.values().collect::<Vec<_>>(), vec!["F", "M"]);

        let mut view = reduction.tagged_view().unwrap().clone();
        assert_eq!(reduction.decode("out", &mut view).unwrap(), 2);
        assert_eq!(view.span_property(&Span::new("d", 2, 2), "kind"), Some("M"));
    }

    #[test]
    fn test_values_named_like_tags_survive_decoding() {
        for scheme in [
            TaggingScheme::InsideOutside,
            TaggingScheme::BeginContinueOutside,
            TaggingScheme::BeginContinueEndUnique,
        ] {
            let mut base = TextBase::new();
            base.add_tokens("d", &["a", "b", "c", "d", "e"]);
            let mut labels = BasicLabels::new(Arc::new(base));
            labels.set_span_property(&Span::new("d", 0, 1), "kind", DEFAULT_TAG);
            labels.set_span_property(&Span::new("d", 2, 1), "kind", "Begin");
            labels.set_span_property(&Span::new("d", 4, 1), "kind", "inside");
            let example = AnnotationExample::new(
                Span::new("d", 0, 5),
                Arc::new(labels),
                ExtractionTarget::Property("kind".to_string()),
            );
            let mut reduction = Reduction::new(scheme, "_tag");
            reduction.reduce(&example).unwrap();

            let view = reduction.tagged_view().unwrap();
            let decoded = reduction.decode_document(view, &Span::new("d", 0, 5));
            assert_eq!(
                decoded,
                vec![
                    (Span::new("d", 0, 1), Some(DEFAULT_TAG.to_string())),
                    (Span::new("d", 2, 1), Some("Begin".to_string())),
                    (Span::new("d", 4, 1), Some("inside".to_string())),
                ],
                "scheme {}",
                scheme
            );
        }
    }

    #[test]
    fn test_type_target_defaults_only_inside_closure() {
        let mut base = TextBase::new();
        base.add_tokens("d", &["a", "b", "c", "d"]);
        let mut labels = BasicLabels::new(Arc::new(base));
        labels.add_to_type(Span::new("d", 0, 1), "T");
        labels.close_type_inside("T", Span::new("d", 0, 2));
        let mut reduction = Reduction::new(TaggingScheme::BeginContinueOutside, "_tag");
        reduction.reduce(&example(Arc::new(labels))).unwrap();

        let tagged = tags(&reduction, 4);
        assert_eq!(tagged[0].as_deref(), Some("Begin"));
        assert_eq!(tagged[1].as_deref(), Some("outside"));
        assert_eq!(tagged[2], None);
        assert_eq!(tagged[3], None);
    }

    #[test]
    fn test_property_target_defaults_whole_document() {
        let mut base = TextBase::new();
        base.add_tokens("d", &["a", "b", "c"]);
        let labels: SharedLabels = Arc::new(BasicLabels::new(Arc::new(base)));
        let example = AnnotationExample::new(
            Span::new("d", 0, 3),
            labels,
            ExtractionTarget::Property("kind".to_string()),
        );
        let mut reduction = Reduction::new(TaggingScheme::BeginContinueEndUnique, "_tag");
        reduction.reduce(&example).unwrap();
        assert_eq!(tags(&reduction, 3), some(&["outside", "outside", "outside"]));
    }

    #[test]
    fn test_empty_span_is_rejected() {
        let labels = store(&["a", "b"], &[(0, 1), (1, 1)], true);
        let mut reduction = Reduction::new(TaggingScheme::InsideOutside, "_tag");
        let result = reduction.reduce(&example(labels));

        assert!(matches!(result, Err(SegtagError::EmptySpan(_))));
        assert!(reduction.tagged_view().is_none());
        assert!(reduction.tag_vocabulary().is_empty());
    }

    #[test]
    fn test_vocabulary_never_shrinks() {
        let mut reduction = Reduction::new(TaggingScheme::BeginContinueEndUnique, "_tag");
        let mut sizes = Vec::new();
        for value in ["PER", "ORG", "PER", "LOC"] {
            let mut base = TextBase::new();
            base.add_tokens("d", &["x", "y"]);
            let mut labels = BasicLabels::new(Arc::new(base));
            labels.set_span_property(&Span::new("d", 0, 1), "kind", value);
            let example = AnnotationExample::new(
                Span::new("d", 0, 2),
                Arc::new(labels),
                ExtractionTarget::Property("kind".to_string()),
            );
            reduction.reduce(&example).unwrap();
            sizes.push(reduction.tag_vocabulary().len());
        }
        assert_eq!(sizes, vec![1, 2, 2, 3]);
        assert!(reduction.class_names().contains("Unique-LOC"));
        assert!(reduction.class_names().contains(DEFAULT_TAG));
    }

    #[test]
    fn test_incomplete_runs_are_dropped() {
        let mut base = TextBase::new();
        base.add_tokens("d", &["a", "b", "c", "d", "e"]);
        let mut labels = BasicLabels::new(Arc::new(base));
        for (i, tag) in ["Begin", "Continue", "outside", "Continue", "End"]
            .iter()
            .enumerate()
        {
            labels.set_token_property(&Token::new("d", i), "_tag", tag);
        }

        let reduction = Reduction::new(TaggingScheme::BeginContinueEndUnique, "_tag");
        assert!(reduction
            .decode_document(&labels, &Span::new("d", 0, 5))
            .is_empty());

        let reduction = Reduction::new(TaggingScheme::BeginContinueOutside, "_tag");
        let spans = reduction.decode_document(&labels, &Span::new("d", 0, 5));
        assert_eq!(spans, vec![(Span::new("d", 0, 2), None)]);
    }

    #[test]
    fn test_round_trip_each_scheme() {
        let gold = [(0, 2), (3, 4), (5, 8)];
        for scheme in [
            TaggingScheme::InsideOutside,
            TaggingScheme::BeginContinueOutside,
            TaggingScheme::BeginContinueEndUnique,
        ] {
            let labels = store(&["a", "b", "c", "d", "e", "f", "g", "h"], &gold, true);
            let mut reduction = Reduction::new(scheme, "_tag");
            reduction.reduce(&example(labels)).unwrap();

            let mut view = reduction.tagged_view().unwrap().clone();
            reduction.decode("out", &mut view).unwrap();
            let decoded: Vec<Span> = view.instances("out", "d").into_iter().collect();
            let expected: Vec<Span> = gold
                .iter()
                .map(|&(lo, hi)| Span::new("d", lo, hi - lo))
                .collect();
            assert_eq!(decoded, expected, "scheme {}", scheme);
        }
    }
}
