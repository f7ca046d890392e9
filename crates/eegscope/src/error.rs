//! Pipeline errors for the recording / epoch-collection stages.

use eegdsp::DspError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage was invoked before the data it needs exists.
    #[error("{operation} needs {requirement}")]
    Precondition {
        operation: &'static str,
        requirement: &'static str,
    },

    /// The recording cannot be read: unknown layout, missing companion, or a
    /// corrupt file.
    #[error("unusable recording {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    #[error("processing failed: {0}")]
    Processing(DspError),

    #[error("no trials match {0}")]
    NoMatchingTrials(String),

    /// The background collection thread panicked before reporting.
    #[error("collection worker stopped without a result")]
    Interrupted,
}

impl PipelineError {
    pub fn precondition(operation: &'static str, requirement: &'static str) -> Self {
        Self::Precondition {
            operation,
            requirement,
        }
    }

    pub fn unrecognized_layout(path: impl Into<PathBuf>) -> Self {
        Self::Format {
            path: path.into(),
            message: "unrecognized layout; expected data.bdf with evt.bdf, or a single .bdf/.edf"
                .to_string(),
        }
    }

    pub fn missing_companion(path: impl Into<PathBuf>, companion: &str) -> Self {
        Self::Format {
            path: path.into(),
            message: format!("paired layout is missing its companion {}", companion),
        }
    }
}

/// Reader format errors stay format errors; everything else the library
/// reports is a processing failure.
impl From<DspError> for PipelineError {
    fn from(err: DspError) -> Self {
        match err {
            DspError::Format { path, message } => Self::Format { path, message },
            other => Self::Processing(other),
        }
    }
}
