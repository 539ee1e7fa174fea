//! Reference learners
//!
//! `Perceptron` is the online binary learner driven by the semi-Markov
//! trainer. `GreedyCmmLearner` trains a conditional Markov model: a
//! multiclass perceptron over per-token instances extended with the classes
//! of the preceding tokens, decoded greedily left to right.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use segtag_core::Result;

use crate::classify::{
    BatchSequenceLearner, BinaryClassifier, ClassLabel, Example, Instance, OnlineBinaryLearner,
    SequenceClassifier, SequenceDataset,
};
use crate::reduction::DEFAULT_TAG;

/// History class used before the first token of a sequence
pub const START_CLASS: &str = "START";

// ============================================================================
// Binary
// ============================================================================

/// Weighted sum of feature values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearBinaryClassifier {
    weights: HashMap<String, f64>,
}

impl LinearBinaryClassifier {
    pub fn weight(&self, feature: &str) -> f64 {
        self.weights.get(feature).copied().unwrap_or(0.0)
    }

    /// Add `scale` times the instance to the weights
    fn update(&mut self, instance: &Instance, scale: f64) {
        for (name, value) in instance.features() {
            *self.weights.entry(name.to_string()).or_insert(0.0) += scale * value;
        }
    }
}

impl BinaryClassifier for LinearBinaryClassifier {
    fn score(&self, instance: &Instance) -> f64 {
        instance
            .features()
            .map(|(name, value)| self.weight(name) * value)
            .sum()
    }
}

/// Perceptron that moves toward every example it is given.
///
/// It does not check the example against its own prediction; the
/// structured trainer only hands it the segments it got wrong.
#[derive(Debug, Clone, Default)]
pub struct Perceptron {
    classifier: LinearBinaryClassifier,
    updates: usize,
}

impl Perceptron {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of examples seen since the last reset
    pub fn updates(&self) -> usize {
        self.updates
    }
}

impl OnlineBinaryLearner for Perceptron {
    fn reset(&mut self) {
        self.classifier = LinearBinaryClassifier::default();
        self.updates = 0;
    }

    fn add_example(&mut self, example: &Example) {
        self.classifier
            .update(&example.instance, example.numeric_label());
        self.updates += 1;
    }

    fn scorer(&self) -> &dyn BinaryClassifier {
        &self.classifier
    }

    fn snapshot(&self) -> Arc<dyn BinaryClassifier> {
        Arc::new(self.classifier.clone())
    }
}

// ============================================================================
// Conditional Markov Model
// ============================================================================

/// Multiclass linear model decoded greedily with predicted history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreedyCmm {
    history_size: usize,
    classes: BTreeMap<String, LinearBinaryClassifier>,
}

impl GreedyCmm {
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    fn history<'a>(&self, labels: &'a [String], i: usize) -> Vec<&'a str> {
        (1..=self.history_size)
            .map(|k| if i >= k { labels[i - k].as_str() } else { START_CLASS })
            .collect()
    }

    /// Highest scoring class; ties go to the first class in name order
    fn best(&self, instance: &Instance) -> Option<ClassLabel> {
        let mut best: Option<ClassLabel> = None;
        for (class, model) in &self.classes {
            let score = model.score(instance);
            if best.as_ref().map_or(true, |b| score > b.weight) {
                best = Some(ClassLabel::new(class.clone(), score));
            }
        }
        best
    }

    fn score_of(&self, class: &str, instance: &Instance) -> f64 {
        self.classes
            .get(class)
            .map(|model| model.score(instance))
            .unwrap_or(0.0)
    }

    /// Greedy decode, taking the class from `forced` wherever it is set
    fn decode(&self, sequence: &[Instance], forced: &[Option<String>]) -> Vec<ClassLabel> {
        let mut labels: Vec<String> = Vec::with_capacity(sequence.len());
        let mut result = Vec::with_capacity(sequence.len());

        for (i, instance) in sequence.iter().enumerate() {
            let instance = instance.with_history(&self.history(&labels, i));
            let label = match forced.get(i).and_then(Option::as_ref) {
                Some(class) => ClassLabel::new(class.clone(), self.score_of(class, &instance)),
                None => self
                    .best(&instance)
                    .unwrap_or_else(|| ClassLabel::new(DEFAULT_TAG, 0.0)),
            };
            labels.push(label.label.clone());
            result.push(label);
        }
        result
    }
}

impl SequenceClassifier for GreedyCmm {
    fn classification(&self, sequence: &[Instance]) -> Vec<ClassLabel> {
        self.decode(sequence, &[])
    }

    fn confidence(
        &self,
        sequence: &[Instance],
        predicted: &[ClassLabel],
        alternate: &[Option<String>],
    ) -> Option<f64> {
        let constrained = self.decode(sequence, alternate);
        let predicted_score: f64 = predicted.iter().map(|l| l.weight).sum();
        let constrained_score: f64 = constrained.iter().map(|l| l.weight).sum();
        Some(predicted_score - constrained_score)
    }
}

/// Trains a `GreedyCmm` with the multiclass perceptron rule, using the gold
/// classes of preceding tokens as history
#[derive(Debug, Clone)]
pub struct GreedyCmmLearner {
    epochs: usize,
}

impl GreedyCmmLearner {
    pub fn new(epochs: usize) -> Self {
        Self { epochs }
    }
}

impl Default for GreedyCmmLearner {
    fn default() -> Self {
        Self::new(10)
    }
}

impl BatchSequenceLearner for GreedyCmmLearner {
    fn batch_train(&mut self, data: &SequenceDataset) -> Result<Arc<dyn SequenceClassifier>> {
        let schema = data.schema();
        if schema.class_names.is_empty() {
            warn!("No training examples, every token will be tagged {}", DEFAULT_TAG);
        }

        let mut model = GreedyCmm {
            history_size: data.history_size,
            classes: schema
                .class_names
                .into_iter()
                .map(|class| (class, LinearBinaryClassifier::default()))
                .collect(),
        };

        for epoch in 0..self.epochs {
            let mut mistakes = 0;
            for sequence in data.sequences() {
                let gold: Vec<String> = sequence.iter().map(|e| e.label.clone()).collect();
                for (i, example) in sequence.iter().enumerate() {
                    let instance = example.instance.with_history(&model.history(&gold, i));
                    let Some(predicted) = model.best(&instance) else {
                        continue;
                    };
                    if predicted.label == example.label {
                        continue;
                    }
                    mistakes += 1;
                    if let Some(m) = model.classes.get_mut(&example.label) {
                        m.update(&instance, 1.0);
                    }
                    if let Some(m) = model.classes.get_mut(&predicted.label) {
                        m.update(&instance, -1.0);
                    }
                }
            }
            debug!(epoch, mistakes, "CMM training epoch");
            if mistakes == 0 {
                break;
            }
        }

        info!(
            sequences = data.len(),
            examples = data.num_examples(),
            classes = model.classes.len(),
            "Trained CMM"
        );
        Ok(Arc::new(model))
    }
}

// ============================================================================
// Tests
// ============================================================================
