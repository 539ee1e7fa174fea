//! Label stores
//!
//! A label store annotates the documents of a `TextBase` with typed spans,
//! type closures, token properties and span properties. `BasicLabels` owns
//! its annotations; `NestedLabels` is a copy-on-write view whose writes never
//! reach the store underneath it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::span::{Span, TextBase, Token};

/// Shared, read-only handle to a label store
pub type SharedLabels = Arc<dyn TextLabels>;

/// Provenance attached to an extracted span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Details {
    /// Confidence reported for the span
    pub confidence: f64,
    /// Sum of the per-token weights predicted inside the span
    pub predicted_weight: f64,
    /// Component that produced the span
    pub source: String,
}

// ============================================================================
// Traits
// ============================================================================

/// Read access to a label store
pub trait TextLabels: Send + Sync {
    /// Documents this store annotates
    fn text_base(&self) -> &Arc<TextBase>;

    /// Whether `span` was added to `span_type`
    fn has_type(&self, span: &Span, span_type: &str) -> bool;

    /// Spans of a type in one document, in span order
    fn instances(&self, span_type: &str, document_id: &str) -> BTreeSet<Span>;

    /// Closed-world extent of a type in one document
    fn closure(&self, span_type: &str, document_id: &str) -> BTreeSet<Span>;

    /// All span types in use
    fn span_types(&self) -> BTreeSet<String>;

    fn token_property(&self, token: &Token, prop: &str) -> Option<&str>;

    /// Names of all token properties in use
    fn token_properties(&self) -> BTreeSet<String>;

    fn span_property(&self, span: &Span, prop: &str) -> Option<&str>;

    /// Spans in one document that carry a value for `prop`
    fn spans_with_property(&self, prop: &str, document_id: &str) -> BTreeSet<Span>;

    fn details(&self, span: &Span, span_type: &str) -> Option<&Details>;

    /// Spans of a type across every document
    fn all_instances(&self, span_type: &str) -> BTreeSet<Span> {
        self.text_base()
            .document_spans()
            .iter()
            .flat_map(|doc| self.instances(span_type, doc.document_id()))
            .collect()
    }
}

/// Write access to a label store. Annotations are only ever added.
pub trait MonotonicTextLabels: TextLabels {
    fn set_token_property(&mut self, token: &Token, prop: &str, value: &str);

    fn set_span_property(&mut self, span: &Span, prop: &str, value: &str);

    fn add_to_type(&mut self, span: Span, span_type: &str);

    fn add_to_type_with_details(&mut self, span: Span, span_type: &str, details: Details);

    /// Declare that absence of `span_type` inside `span` is meaningful
    fn close_type_inside(&mut self, span_type: &str, span: Span);
}

// ============================================================================
// Basic Labels
// ============================================================================

type SpansByDocument = BTreeMap<String, BTreeSet<Span>>;

/// Owned label store
#[derive(Debug, Clone)]
pub struct BasicLabels {
    base: Arc<TextBase>,
    types: HashMap<String, SpansByDocument>,
    closures: HashMap<String, SpansByDocument>,
    token_props: HashMap<String, HashMap<Token, String>>,
    span_props: HashMap<String, BTreeMap<Span, String>>,
    details: HashMap<(Span, String), Details>,
}

impl BasicLabels {
    pub fn new(base: Arc<TextBase>) -> Self {
        Self {
            base,
            types: HashMap::new(),
            closures: HashMap::new(),
            token_props: HashMap::new(),
            span_props: HashMap::new(),
            details: HashMap::new(),
        }
    }

    /// Close a type over every document in the text base
    pub fn close_type_everywhere(&mut self, span_type: &str) {
        for doc in self.base.document_spans() {
            self.close_type_inside(span_type, doc);
        }
    }

    fn spans_in(map: &HashMap<String, SpansByDocument>, key: &str, doc: &str) -> BTreeSet<Span> {
        map.get(key)
            .and_then(|docs| docs.get(doc))
            .cloned()
            .unwrap_or_default()
    }

    fn insert_span(map: &mut HashMap<String, SpansByDocument>, key: &str, span: Span) {
        map.entry(key.to_string())
            .or_default()
            .entry(span.document_id().to_string())
            .or_default()
            .insert(span);
    }
}

impl TextLabels for BasicLabels {
    fn text_base(&self) -> &Arc<TextBase> {
        &self.base
    }

    fn has_type(&self, span: &Span, span_type: &str) -> bool {
        self.types
            .get(span_type)
            .and_then(|docs| docs.get(span.document_id()))
            .map(|spans| spans.contains(span))
            .unwrap_or(false)
    }

    fn instances(&self, span_type: &str, document_id: &str) -> BTreeSet<Span> {
        Self::spans_in(&self.types, span_type, document_id)
    }

    fn closure(&self, span_type: &str, document_id: &str) -> BTreeSet<Span> {
        Self::spans_in(&self.closures, span_type, document_id)
    }

    fn span_types(&self) -> BTreeSet<String> {
        self.types.keys().cloned().collect()
    }

    fn token_property(&self, token: &Token, prop: &str) -> Option<&str> {
        self.token_props
            .get(prop)
            .and_then(|values| values.get(token))
            .map(String::as_str)
    }

    fn token_properties(&self) -> BTreeSet<String> {
        self.token_props.keys().cloned().collect()
    }

    fn span_property(&self, span: &Span, prop: &str) -> Option<&str> {
        self.span_props
            .get(prop)
            .and_then(|values| values.get(span))
            .map(String::as_str)
    }

    fn spans_with_property(&self, prop: &str, document_id: &str) -> BTreeSet<Span> {
        self.span_props
            .get(prop)
            .map(|values| {
                values
                    .keys()
                    .filter(|s| s.document_id() == document_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn details(&self, span: &Span, span_type: &str) -> Option<&Details> {
        self.details.get(&(span.clone(), span_type.to_string()))
    }
}

impl MonotonicTextLabels for BasicLabels {
    fn set_token_property(&mut self, token: &Token, prop: &str, value: &str) {
        self.token_props
            .entry(prop.to_string())
            .or_default()
            .insert(token.clone(), value.to_string());
    }

    fn set_span_property(&mut self, span: &Span, prop: &str, value: &str) {
        self.span_props
            .entry(prop.to_string())
            .or_default()
            .insert(span.clone(), value.to_string());
    }

    fn add_to_type(&mut self, span: Span, span_type: &str) {
        Self::insert_span(&mut self.types, span_type, span);
    }

    fn add_to_type_with_details(&mut self, span: Span, span_type: &str, details: Details) {
        self.details
            .insert((span.clone(), span_type.to_string()), details);
        self.add_to_type(span, span_type);
    }

    fn close_type_inside(&mut self, span_type: &str, span: Span) {
        Self::insert_span(&mut self.closures, span_type, span);
    }
}

// ============================================================================
// Nested Labels
// ============================================================================

/// Copy-on-write view over a shared label store.
///
/// Reads see the view's own annotations first, then the inner store.
#[derive(Clone)]
pub struct NestedLabels {
    inner: SharedLabels,
    outer: BasicLabels,
}

impl NestedLabels {
    pub fn new(inner: SharedLabels) -> Self {
        let outer = BasicLabels::new(inner.text_base().clone());
        Self { inner, outer }
    }

    /// The store this view reads through to
    pub fn inner(&self) -> &SharedLabels {
        &self.inner
    }
}

impl std::fmt::Debug for NestedLabels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedLabels")
            .field("outer", &self.outer)
            .finish_non_exhaustive()
    }
}

impl TextLabels for NestedLabels {
    fn text_base(&self) -> &Arc<TextBase> {
        self.outer.text_base()
    }

    fn has_type(&self, span: &Span, span_type: &str) -> bool {
        self.outer.has_type(span, span_type) || self.inner.has_type(span, span_type)
    }

    fn instances(&self, span_type: &str, document_id: &str) -> BTreeSet<Span> {
        let mut spans = self.inner.instances(span_type, document_id);
        spans.extend(self.outer.instances(span_type, document_id));
        spans
    }

    fn closure(&self, span_type: &str, document_id: &str) -> BTreeSet<Span> {
        let mut spans = self.inner.closure(span_type, document_id);
        spans.extend(self.outer.closure(span_type, document_id));
        spans
    }

    fn span_types(&self) -> BTreeSet<String> {
        let mut types = self.inner.span_types();
        types.extend(self.outer.span_types());
        types
    }

    fn token_property(&self, token: &Token, prop: &str) -> Option<&str> {
        self.outer
            .token_property(token, prop)
            .or_else(|| self.inner.token_property(token, prop))
    }

    fn token_properties(&self) -> BTreeSet<String> {
        let mut props = self.inner.token_properties();
        props.extend(self.outer.token_properties());
        props
    }

    fn span_property(&self, span: &Span, prop: &str) -> Option<&str> {
        self.outer
            .span_property(span, prop)
            .or_else(|| self.inner.span_property(span, prop))
    }

    fn spans_with_property(&self, prop: &str, document_id: &str) -> BTreeSet<Span> {
        let mut spans = self.inner.spans_with_property(prop, document_id);
        spans.extend(self.outer.spans_with_property(prop, document_id));
        spans
    }

    fn details(&self, span: &Span, span_type: &str) -> Option<&Details> {
        self.outer
            .details(span, span_type)
            .or_else(|| self.inner.details(span, span_type))
    }
}

impl MonotonicTextLabels for NestedLabels {
    fn set_token_property(&mut self, token: &Token, prop: &str, value: &str) {
        self.outer.set_token_property(token, prop, value);
    }

    fn set_span_property(&mut self, span: &Span, prop: &str, value: &str) {
        self.outer.set_span_property(span, prop, value);
    }

    fn add_to_type(&mut self, span: Span, span_type: &str) {
        self.outer.add_to_type(span, span_type);
    }

    fn add_to_type_with_details(&mut self, span: Span, span_type: &str, details: Details) {
        self.outer.add_to_type_with_details(span, span_type, details);
    }

    fn close_type_inside(&mut self, span_type: &str, span: Span) {
        self.outer.close_type_inside(span_type, span);
    }
}

// ============================================================================
// Tests
// ============================================================================
