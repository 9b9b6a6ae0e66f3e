//! Error type definitions for the feedpipe import engine
//!
//! This module defines all error types used throughout the engine,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward. Each pipeline stage owns a small,
//! closed set of error kinds so callers can match on behaviour (retryable
//! transport failure vs. permanent misconfiguration) instead of strings.

use thiserror::Error;

use crate::models::Stage;

/// Top-level engine error type
///
/// This enum represents all possible errors that can occur in the engine.
/// It uses `thiserror` to provide automatic error trait implementations and
/// proper error chaining.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Source download errors
    #[error("Downloader error: {0}")]
    Downloader(#[from] DownloaderError),

    /// Raw content parsing errors
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    /// Filter rule evaluation errors
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Plugin registry lookup errors
    #[error("Factory error: {0}")]
    Factory(#[from] FactoryError),

    /// Plugin option validation errors
    #[error("Option validation error: {0}")]
    OptionValidation(#[from] OptionValidationError),

    /// Pipeline orchestration errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Execution lifecycle errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Downloader-specific errors
///
/// The three kinds are deliberately distinct so calling code can tell a
/// retryable transport failure (`ConnectionFailed`) from a permanent one
/// (`FileNotFound`) without string matching.
#[derive(Error, Debug)]
pub enum DownloaderError {
    /// Could not reach the remote host (DNS, refused, timeout)
    #[error("Connection failed: {url} - {message}")]
    ConnectionFailed { url: String, message: String },

    /// The host answered but the requested resource does not exist
    #[error("File not found: {url}")]
    FileNotFound { url: String },

    /// Any other download failure (auth, protocol, truncated body)
    #[error("Download failed: {url} - {message}")]
    DownloadFailed { url: String, message: String },
}

/// Reader-specific errors
#[derive(Error, Debug)]
pub enum ReaderError {
    /// Content is structurally not what the reader expects
    /// (e.g. a JSON scalar where a row collection is required)
    #[error("Invalid content for {reader_type} reader: {reason}")]
    InvalidContent { reader_type: String, reason: String },

    /// The underlying parser rejected the content
    #[error("Parsing failed for {reader_type} reader: {reason}")]
    ParsingFailed { reader_type: String, reason: String },
}

/// Filter rule evaluation errors
///
/// A row that simply does not match a rule is never an error; these kinds
/// only cover malformed rules and unusable data values.
#[derive(Error, Debug)]
pub enum FilterError {
    /// Rule references an operator that is not registered
    #[error("Unknown filter operator: '{name}'")]
    UnknownOperator { name: String },

    /// Rule is missing required fields or carries an unusable value
    #[error("Invalid filter rule on '{key}': {reason}")]
    InvalidRule { key: String, reason: String },

    /// Regex operator received an uncompilable pattern
    #[error("Regex error in pattern '{pattern}': {message}")]
    RegexError { pattern: String, message: String },

    /// Data value type is not supported by the operator
    #[error("Operator '{operator}' does not support values of type {kind}")]
    UnsupportedValueType {
        operator: &'static str,
        kind: &'static str,
    },
}

/// Plugin registry/factory errors
#[derive(Error, Debug)]
pub enum FactoryError {
    /// Lookup key is not registered; lists what is available
    #[error("Unsupported {kind} type '{requested}' (available: {available})")]
    UnsupportedType {
        kind: &'static str,
        requested: String,
        available: String,
    },

    /// A registry was asked to register two plugins under one name
    #[error("Duplicate {kind} registration for '{name}'")]
    DuplicateRegistration { kind: &'static str, name: String },
}

/// Typed option validation failure
///
/// Raised when a plugin recognizes a supplied option key but the value has
/// the wrong type. Unrecognized keys are silently ignored because plugins
/// share one unified options bag.
#[derive(Error, Debug)]
#[error("Invalid option '{option}' for {owner}: expected {expected}, got {actual}")]
pub struct OptionValidationError {
    pub option: String,
    pub expected: &'static str,
    pub actual: &'static str,
    pub owner: &'static str,
}

/// Pipeline orchestration errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage could not complete; the chain halts here
    #[error("Stage {stage} failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<EngineError>,
    },

    /// A stage ran before its required input stage
    #[error("Stage {stage} has no input: {missing} result missing from context")]
    MissingStageInput { stage: Stage, missing: Stage },

    /// Run was aborted between stages
    #[error("Pipeline run cancelled before stage {stage}")]
    Cancelled { stage: Stage },

    /// The whole run exceeded its job-level time budget
    #[error("Pipeline run timed out after {seconds}s")]
    TimedOut { seconds: u64 },
}

/// Execution lifecycle errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The pipeline already has a running execution
    #[error("Pipeline {pipeline_id} already has a running execution ({execution_id})")]
    AlreadyRunning {
        pipeline_id: i64,
        execution_id: uuid::Uuid,
    },

    /// Attempted an illegal status transition
    #[error("Invalid execution transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Execution record does not exist
    #[error("Execution not found: {execution_id}")]
    NotFound { execution_id: uuid::Uuid },

    /// Pipeline record does not exist
    #[error("Pipeline not found: {pipeline_id}")]
    PipelineNotFound { pipeline_id: i64 },
}

impl EngineError {
    /// Create a configuration error with a custom message
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl DownloaderError {
    pub fn connection_failed<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn file_not_found<U: Into<String>>(url: U) -> Self {
        Self::FileNotFound { url: url.into() }
    }

    pub fn download_failed<U: Into<String>, M: Into<String>>(url: U, message: M) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            message: message.into(),
        }
    }
}

impl ReaderError {
    pub fn invalid_content<T: Into<String>, R: Into<String>>(reader_type: T, reason: R) -> Self {
        Self::InvalidContent {
            reader_type: reader_type.into(),
            reason: reason.into(),
        }
    }

    pub fn parsing_failed<T: Into<String>, R: Into<String>>(reader_type: T, reason: R) -> Self {
        Self::ParsingFailed {
            reader_type: reader_type.into(),
            reason: reason.into(),
        }
    }
}

impl FilterError {
    pub fn invalid_rule<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::InvalidRule {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl PipelineError {
    pub fn stage_failed(stage: Stage, source: impl Into<EngineError>) -> Self {
        Self::StageFailed {
            stage,
            source: Box::new(source.into()),
        }
    }
}
