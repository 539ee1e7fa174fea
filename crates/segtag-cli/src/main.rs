//! Segtag CLI - Command-line interface
//!
//! Usage:
//!   segtag experiment --corpus <file> --span-type <type>
//!   segtag experiment --corpus <file> --span-prop <property> --learner segment
//!   segtag reduce --corpus <file> --span-type <type> --output <file>

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use segtag_core::{
    AppConfig, CorpusFile, LearnerKind, LoggingConfig, SharedLabels, TaggingScheme, TextLabels,
    Tokenizer,
};
use segtag_learn::experiment::run_experiment;
use segtag_learn::sequence::SequenceAnnotatorLearner;
use segtag_learn::teacher::{AnnotatorTeacher, TextLabelsTeacher};
use segtag_learn::ExtractionTarget;

#[derive(Parser)]
#[command(name = "segtag")]
#[command(about = "Sequence and semi-Markov span extraction")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on part of a corpus and evaluate on the rest
    Experiment {
        #[command(flatten)]
        input: InputArgs,

        /// Learner to train
        #[arg(long)]
        learner: Option<LearnerKind>,

        /// Fraction of documents used for training
        #[arg(long)]
        train_fraction: Option<f64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Write the predicted spans to this file as JSON
        #[arg(long)]
        predictions: Option<PathBuf>,
    },
    /// Reduce a corpus to tagged token sequences
    Reduce {
        #[command(flatten)]
        input: InputArgs,

        /// Write the sequence dataset to this file as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// JSON corpus file
    #[arg(long)]
    corpus: PathBuf,

    /// Span type to learn
    #[arg(long, conflicts_with = "span_prop")]
    span_type: Option<String>,

    /// Span property to learn
    #[arg(long)]
    span_prop: Option<String>,

    /// Tagging scheme
    #[arg(long)]
    scheme: Option<TaggingScheme>,
}

impl InputArgs {
    fn apply(&self, config: &mut AppConfig) {
        if self.span_type.is_some() || self.span_prop.is_some() {
            config.experiment.span_type = self.span_type.clone();
            config.experiment.span_property = self.span_prop.clone();
        }
        if let Some(scheme) = self.scheme {
            config.reduction.scheme = scheme;
        }
    }
}

/// A predicted span as written to the predictions file
#[derive(Serialize)]
struct PredictedSpan {
    document: String,
    start: usize,
    end: usize,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    }
    .with_env_override()?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Experiment {
            input,
            learner,
            train_fraction,
            json,
            predictions,
        } => {
            let mut config = config;
            input.apply(&mut config);
            if let Some(learner) = learner {
                config.experiment.learner = learner;
            }
            if let Some(fraction) = train_fraction {
                config.experiment.train_fraction = fraction;
            }

            let labels = load_corpus(&input.corpus, &config)?;
            let (report, predicted) = run_experiment(labels.clone(), &config)?;

            if let Some(path) = predictions {
                let class_property = config.experiment.span_property.as_deref();
                let spans: Vec<PredictedSpan> = labels
                    .text_base()
                    .document_spans()
                    .iter()
                    .flat_map(|doc| {
                        predicted.instances(&config.experiment.output_type, doc.document_id())
                    })
                    .map(|span| PredictedSpan {
                        document: span.document_id().to_string(),
                        start: span.start(),
                        end: span.end(),
                        text: labels
                            .text_base()
                            .span_text(&span)
                            .unwrap_or_default()
                            .to_string(),
                        value: class_property
                            .and_then(|p| predicted.span_property(&span, p))
                            .map(str::to_string),
                        confidence: predicted
                            .details(&span, &config.experiment.output_type)
                            .map(|d| d.confidence),
                    })
                    .collect();
                std::fs::write(&path, serde_json::to_string_pretty(&spans)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), spans = spans.len(), "Wrote predictions");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Learner: {} | Target: {} | Train: {} | Test: {}\n",
                    report.learner, report.target, report.train_documents, report.test_documents
                );
                for stats in &report.epoch_stats {
                    println!(
                        "Epoch {}: {} false positives, {} false negatives",
                        stats.epoch, stats.false_positives, stats.false_negatives
                    );
                }
                println!("{}", report.metrics.report());
            }
        }
        Commands::Reduce { input, output } => {
            let mut config = config;
            input.apply(&mut config);
            config.validate()?;

            let labels = load_corpus(&input.corpus, &config)?;
            let target = ExtractionTarget::from_signal(
                config.experiment.span_type.as_deref(),
                config.experiment.span_property.as_deref(),
            )?;

            let mut learner = SequenceAnnotatorLearner::from_config(&config);
            TextLabelsTeacher::new(labels, target.clone()).answer_queries(&mut learner)?;

            let dataset = learner.dataset();
            println!(
                "Target: {} | Scheme: {} | Sequences: {} | Tokens: {} | Skipped: {}",
                target,
                config.reduction.scheme,
                dataset.len(),
                dataset.num_examples(),
                learner.skipped()
            );
            println!(
                "Classes: {}",
                learner
                    .reduction()
                    .class_names()
                    .into_iter()
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(dataset)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "Wrote sequence dataset");
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_corpus(path: &Path, config: &AppConfig) -> anyhow::Result<SharedLabels> {
    let tokenizer = Tokenizer::new(&config.tokenizer.pattern)?;
    let corpus = CorpusFile::from_path(path)?;
    let documents = corpus.documents.len();
    let labels = corpus.into_labels(&tokenizer)?;
    info!(path = %path.display(), documents, "Loaded corpus");
    Ok(Arc::new(labels))
}
