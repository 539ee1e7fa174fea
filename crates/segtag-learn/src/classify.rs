//! Classifier seams
//!
//! Feature vectors, labeled examples, sequence datasets and the traits the
//! learners call into. Concrete classifiers live behind these traits; see
//! `perceptron` for the reference implementations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use segtag_core::{Result, SegtagError};

/// Class name of positive binary examples
pub const POS_CLASS: &str = "POS";
/// Class name of negative binary examples
pub const NEG_CLASS: &str = "NEG";

const HISTORY_PREFIX: &str = "history";

// ============================================================================
// Instances and Examples
// ============================================================================

/// Sparse feature vector keyed by feature name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    features: BTreeMap<String, f64>,
}

impl Instance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a binary feature
    pub fn add_binary(&mut self, name: impl Into<String>) {
        self.features.insert(name.into(), 1.0);
    }

    /// Add to a numeric feature
    pub fn add_numeric(&mut self, name: impl Into<String>, value: f64) {
        *self.features.entry(name.into()).or_insert(0.0) += value;
    }

    pub fn weight(&self, name: &str) -> f64 {
        self.features.get(name).copied().unwrap_or(0.0)
    }

    pub fn features(&self) -> impl Iterator<Item = (&str, f64)> {
        self.features.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Copy of this instance with the previous classes added as features.
    ///
    /// `history[0]` is the most recent class.
    pub fn with_history<S: AsRef<str>>(&self, history: &[S]) -> Instance {
        let mut instance = self.clone();
        for (i, class) in history.iter().enumerate() {
            instance.add_binary(format!("{}.{}.{}", HISTORY_PREFIX, i + 1, class.as_ref()));
        }
        instance
    }
}

/// An instance paired with its class name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub instance: Instance,
    pub label: String,
}

impl Example {
    pub fn new(instance: Instance, label: impl Into<String>) -> Self {
        Self {
            instance,
            label: label.into(),
        }
    }

    /// Binary example; `positive` selects `POS` or `NEG`
    pub fn binary(instance: Instance, positive: bool) -> Self {
        Self::new(instance, if positive { POS_CLASS } else { NEG_CLASS })
    }

    pub fn is_positive(&self) -> bool {
        self.label == POS_CLASS
    }

    /// +1.0 for positive examples, -1.0 otherwise
    pub fn numeric_label(&self) -> f64 {
        if self.is_positive() {
            1.0
        } else {
            -1.0
        }
    }
}

/// A predicted class with the weight the classifier gave it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassLabel {
    pub label: String,
    pub weight: f64,
}

impl ClassLabel {
    pub fn new(label: impl Into<String>, weight: f64) -> Self {
        Self {
            label: label.into(),
            weight,
        }
    }

    /// Binary label from a signed score
    pub fn binary(score: f64) -> Self {
        if score > 0.0 {
            Self::new(POS_CLASS, score)
        } else {
            Self::new(NEG_CLASS, -score)
        }
    }

    pub fn is_positive(&self) -> bool {
        self.label == POS_CLASS
    }
}

/// Sum of the predicted weights of labels `lo..hi`
pub fn sum_predicted_weights(labels: &[ClassLabel], lo: usize, hi: usize) -> f64 {
    labels[lo.min(labels.len())..hi.min(labels.len())]
        .iter()
        .map(|l| l.weight)
        .sum()
}

// ============================================================================
// Schema and Datasets
// ============================================================================

/// Set of class names seen in a dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleSchema {
    pub class_names: BTreeSet<String>,
}

impl ExampleSchema {
    /// A usable schema has at least two classes
    pub fn validate(&self) -> Result<()> {
        if self.class_names.len() < 2 {
            return Err(SegtagError::Schema(format!(
                "need at least 2 classes, found {:?}",
                self.class_names
            )));
        }
        Ok(())
    }
}

/// Training sequences, one per document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceDataset {
    pub history_size: usize,
    sequences: Vec<Vec<Example>>,
}

impl SequenceDataset {
    pub fn new(history_size: usize) -> Self {
        Self {
            history_size,
            sequences: Vec::new(),
        }
    }

    pub fn add_sequence(&mut self, sequence: Vec<Example>) {
        self.sequences.push(sequence);
    }

    pub fn sequences(&self) -> &[Vec<Example>] {
        &self.sequences
    }

    /// Number of sequences
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Number of examples across all sequences
    pub fn num_examples(&self) -> usize {
        self.sequences.iter().map(Vec::len).sum()
    }

    pub fn schema(&self) -> ExampleSchema {
        ExampleSchema {
            class_names: self
                .sequences
                .iter()
                .flatten()
                .map(|e| e.label.clone())
                .collect(),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Scores an instance; the sign gives the class
pub trait BinaryClassifier: Send + Sync {
    fn score(&self, instance: &Instance) -> f64;
}

/// Binary learner trained one signed example at a time
pub trait OnlineBinaryLearner: Send {
    fn reset(&mut self);

    fn add_example(&mut self, example: &Example);

    /// The classifier as currently trained
    fn scorer(&self) -> &dyn BinaryClassifier;

    /// Independent copy of the current classifier
    fn snapshot(&self) -> Arc<dyn BinaryClassifier>;
}

/// Labels whole sequences of instances
pub trait SequenceClassifier: Send + Sync {
    /// One class label per instance
    fn classification(&self, sequence: &[Instance]) -> Vec<ClassLabel>;

    /// Score of `predicted` minus the score of the labeling the classifier
    /// picks when forced to agree with `alternate` wherever it is `Some`.
    /// `None` when the classifier cannot compare paths.
    fn confidence(
        &self,
        _sequence: &[Instance],
        _predicted: &[ClassLabel],
        _alternate: &[Option<String>],
    ) -> Option<f64> {
        None
    }
}

/// Trains a sequence classifier from a whole dataset
pub trait BatchSequenceLearner: Send {
    fn batch_train(&mut self, data: &SequenceDataset) -> Result<Arc<dyn SequenceClassifier>>;
}

// ============================================================================
// Tests
// ============================================================================
