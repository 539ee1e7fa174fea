//! Train/test experiments
//!
//! Splits the documents of a label store by id order, trains the configured
//! learner on the first part, annotates the rest and scores the predictions
//! against the gold spans.

use serde::Serialize;
use tracing::{info, warn};

use segtag_core::{AppConfig, LearnerKind, NestedLabels, Result, SharedLabels, Span};

use crate::confidence::ConfidenceReportingAnnotator;
use crate::metrics::{AggregateMetrics, Evaluator};
use crate::semi_markov::{EpochStats, SegmentLearner};
use crate::sequence::SequenceAnnotatorLearner;
use crate::teacher::{AnnotatorTeacher, TextLabelsTeacher};
use crate::{Annotator, AnnotatorLearner, ExtractionTarget};

/// Outcome of one experiment
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub learner: LearnerKind,
    pub target: String,
    pub train_documents: usize,
    pub test_documents: usize,
    pub metrics: AggregateMetrics,
    /// Per-epoch mistakes, for the segment learner
    pub epoch_stats: Vec<EpochStats>,
}

/// Split documents into a training prefix and a test suffix.
///
/// The training part gets `n * train_fraction` documents, rounded.
pub fn split_documents(documents: Vec<Span>, train_fraction: f64) -> (Vec<Span>, Vec<Span>) {
    let n = documents.len();
    let n_train = ((n as f64) * train_fraction.clamp(0.0, 1.0)).round() as usize;
    let mut train = documents;
    let test = train.split_off(n_train.min(n));
    (train, test)
}

/// Train on a split of `labels` and evaluate on the held-out documents.
///
/// When nothing is held out the training documents are evaluated instead.
/// Returns the report and the view holding the predicted spans.
pub fn run_experiment(
    labels: SharedLabels,
    config: &AppConfig,
) -> Result<(ExperimentReport, NestedLabels)> {
    config.validate()?;
    let experiment = &config.experiment;
    let target = ExtractionTarget::from_signal(
        experiment.span_type.as_deref(),
        experiment.span_property.as_deref(),
    )?;

    let (train, mut test) = split_documents(
        labels.text_base().document_spans(),
        experiment.train_fraction,
    );
    if test.is_empty() {
        warn!("No held-out documents, evaluating on the training documents");
        test = train.clone();
    }
    info!(
        learner = %experiment.learner,
        target = %target,
        train = train.len(),
        test = test.len(),
        "Starting experiment"
    );

    let teacher =
        TextLabelsTeacher::new(labels.clone(), target.clone()).with_documents(train.clone());
    let mut epoch_stats = Vec::new();

    let (annotator, class_property) = match experiment.learner {
        LearnerKind::Sequence => {
            let mut learner = SequenceAnnotatorLearner::from_config(config);
            teacher.answer_queries(&mut learner)?;
            let annotator = learner.sequence_annotator()?;
            let class_property = annotator.reduction().class_property().to_string();
            let annotator: Box<dyn Annotator> =
                Box::new(ConfidenceReportingAnnotator::new(annotator));
            (annotator, Some(class_property))
        }
        LearnerKind::Segment => {
            let mut learner = SegmentLearner::from_config(&config.segment);
            learner.set_annotation_type(&experiment.output_type);
            let annotator = teacher.train(&mut learner)?;
            epoch_stats = learner.epoch_stats().to_vec();
            (annotator, None)
        }
    };

    let predicted = annotator.annotate_documents(labels.clone(), &test)?;

    let evaluator = Evaluator::new().with_value_matching(class_property.is_some());
    let class_property = class_property.unwrap_or_default();
    let mut metrics = AggregateMetrics::default();
    for document in &test {
        let gold = teacher.label(document)?;
        metrics.add_document(&evaluator.evaluate_document(
            &gold,
            &predicted,
            annotator.span_type(),
            &class_property,
        ));
    }

    info!(
        span_f1 = metrics.span_metrics.f1_score(),
        token_f1 = metrics.token_metrics.f1_score(),
        "Experiment finished"
    );

    let report = ExperimentReport {
        learner: experiment.learner,
        target: target.to_string(),
        train_documents: train.len(),
        test_documents: test.len(),
        metrics,
        epoch_stats,
    };
    Ok((report, predicted))
}
