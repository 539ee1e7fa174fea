//! Segtag Configuration Management
//!
//! Handles configuration from environment variables and TOML config files
//! with defaults matching the recommended learner settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::tokenizer::DEFAULT_TOKEN_PATTERN;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Tokenizer configuration
    pub tokenizer: TokenizerConfig,

    /// Extraction-to-tagging reduction
    pub reduction: ReductionConfig,

    /// Sequence learner settings
    pub sequence: SequenceConfig,

    /// Semi-Markov segment learner settings
    pub segment: SegmentConfig,

    /// Train/test experiment settings
    pub experiment: ExperimentConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(scheme) = std::env::var("SEGTAG_SCHEME") {
            config.reduction.scheme = scheme.parse()?;
        }
        if let Ok(learner) = std::env::var("SEGTAG_LEARNER") {
            config.experiment.learner = learner.parse()?;
        }
        if let Ok(epochs) = std::env::var("SEGTAG_EPOCHS") {
            let epochs = parse_number("SEGTAG_EPOCHS", &epochs)?;
            config.sequence.epochs = epochs;
            config.segment.epochs = epochs;
        }
        if let Ok(size) = std::env::var("SEGTAG_MAX_SEGMENT_SIZE") {
            config.segment.max_segment_size = parse_number("SEGTAG_MAX_SEGMENT_SIZE", &size)?;
        }
        if let Ok(size) = std::env::var("SEGTAG_HISTORY_SIZE") {
            config.sequence.history_size = parse_number("SEGTAG_HISTORY_SIZE", &size)?;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let defaults = Self::default();

        // Only override if env values differ from defaults
        if env_config.reduction.scheme != defaults.reduction.scheme {
            self.reduction.scheme = env_config.reduction.scheme;
        }
        if env_config.experiment.learner != defaults.experiment.learner {
            self.experiment.learner = env_config.experiment.learner;
        }
        if env_config.sequence.epochs != defaults.sequence.epochs {
            self.sequence.epochs = env_config.sequence.epochs;
        }
        if env_config.segment.epochs != defaults.segment.epochs {
            self.segment.epochs = env_config.segment.epochs;
        }
        if env_config.segment.max_segment_size != defaults.segment.max_segment_size {
            self.segment.max_segment_size = env_config.segment.max_segment_size;
        }
        if env_config.sequence.history_size != defaults.sequence.history_size {
            self.sequence.history_size = env_config.sequence.history_size;
        }
        if env_config.logging.level != defaults.logging.level {
            self.logging.level = env_config.logging.level;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject settings no learner can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment.max_segment_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "segment.max_segment_size".to_string(),
                value: "0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.experiment.train_fraction) {
            return Err(ConfigError::InvalidValue {
                key: "experiment.train_fraction".to_string(),
                value: self.experiment.train_fraction.to_string(),
            });
        }
        if self.experiment.span_type.is_some() && self.experiment.span_property.is_some() {
            return Err(ConfigError::InvalidValue {
                key: "experiment.span_property".to_string(),
                value: "set together with experiment.span_type".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Tokenizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Regex whose matches are tokens
    pub pattern: String,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_TOKEN_PATTERN.to_string(),
        }
    }
}

/// Extraction-to-tagging reduction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Tagging scheme
    pub scheme: TaggingScheme,

    /// Token property the tags are written under
    pub token_property: String,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            scheme: TaggingScheme::BeginContinueEndUnique,
            token_property: "_tag".to_string(),
        }
    }
}

/// Supported tagging schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaggingScheme {
    InsideOutside,
    BeginContinueOutside,
    BeginContinueEndUnique,
}

impl TaggingScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsideOutside => "inside_outside",
            Self::BeginContinueOutside => "begin_continue_outside",
            Self::BeginContinueEndUnique => "begin_continue_end_unique",
        }
    }
}

impl std::fmt::Display for TaggingScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaggingScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "inside_outside" | "io" => Ok(Self::InsideOutside),
            "begin_continue_outside" | "bco" => Ok(Self::BeginContinueOutside),
            "begin_continue_end_unique" | "bceu" => Ok(Self::BeginContinueEndUnique),
            _ => Err(ConfigError::InvalidValue {
                key: "SEGTAG_SCHEME".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Sequence learner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Number of previous classes used as features
    pub history_size: usize,

    /// Training passes of the sequence classifier
    pub epochs: usize,

    /// Tokens of context on each side of a token
    pub window_size: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            history_size: 1,
            epochs: 10,
            window_size: 3,
        }
    }
}

/// Semi-Markov segment learner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Structured training passes over the documents
    pub epochs: usize,

    /// Longest segment the decoder considers
    pub max_segment_size: usize,

    /// Tokens of context on each side of a segment
    pub window_size: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            max_segment_size: 5,
            window_size: 5,
        }
    }
}

/// Which learner an experiment trains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearnerKind {
    Sequence,
    Segment,
}

impl std::str::FromStr for LearnerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequence" => Ok(Self::Sequence),
            "segment" | "semi_markov" | "csmm" => Ok(Self::Segment),
            _ => Err(ConfigError::InvalidValue {
                key: "SEGTAG_LEARNER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for LearnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequence => write!(f, "sequence"),
            Self::Segment => write!(f, "segment"),
        }
    }
}

/// Train/test experiment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Learner to train
    pub learner: LearnerKind,

    /// Fraction of documents (in id order) used for training
    pub train_fraction: f64,

    /// Span type to learn (exclusive with `span_property`)
    pub span_type: Option<String>,

    /// Span property to learn (exclusive with `span_type`)
    pub span_property: Option<String>,

    /// Type the learned annotator writes
    pub output_type: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            learner: LearnerKind::Sequence,
            train_fraction: 0.7,
            span_type: None,
            span_property: None,
            output_type: "_prediction".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.reduction.scheme, TaggingScheme::BeginContinueEndUnique);
        assert_eq!(config.segment.max_segment_size, 5);
        assert_eq!(config.sequence.history_size, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!(
            "inside_outside".parse::<TaggingScheme>().unwrap(),
            TaggingScheme::InsideOutside
        );
        assert_eq!(
            "BCO".parse::<TaggingScheme>().unwrap(),
            TaggingScheme::BeginContinueOutside
        );
        assert_eq!(
            "begin-continue-end-unique".parse::<TaggingScheme>().unwrap(),
            TaggingScheme::BeginContinueEndUnique
        );
        assert!("bilou".parse::<TaggingScheme>().is_err());
    }

    #[test]
    fn test_learner_parse() {
        assert_eq!("segment".parse::<LearnerKind>().unwrap(), LearnerKind::Segment);
        assert_eq!("Sequence".parse::<LearnerKind>().unwrap(), LearnerKind::Sequence);
        assert!("tree".parse::<LearnerKind>().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[reduction]
scheme = "inside_outside"

[segment]
max_segment_size = 3

[experiment]
learner = "segment"
span_type = "person"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.reduction.scheme, TaggingScheme::InsideOutside);
        assert_eq!(config.reduction.token_property, "_tag");
        assert_eq!(config.segment.max_segment_size, 3);
        assert_eq!(config.segment.epochs, 5);
        assert_eq!(config.experiment.learner, LearnerKind::Segment);
        assert_eq!(config.experiment.span_type.as_deref(), Some("person"));
    }

    #[test]
    fn test_from_file_rejects_both_targets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[experiment]
span_type = "person"
span_property = "kind"
"#
        )
        .unwrap();

        assert!(matches!(
            AppConfig::from_file(file.path()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::from_file("/nonexistent/segtag.toml");
        assert!(matches!(result, Err(ConfigError::FileReadError { .. })));
    }
}
