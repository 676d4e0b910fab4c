//! Error types for event-bus

use crate::bus::HandlerError;

/// Failure of a pipeline run
///
/// Carries the stage that aborted the run; later stages were not executed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A stage returned an error
    #[error("Pipeline '{pipeline}' failed at stage {index} ({stage}): {source}")]
    StageFailed {
        pipeline: String,
        stage: String,
        index: usize,
        #[source]
        source: HandlerError,
    },

    /// A stage panicked
    #[error("Pipeline '{pipeline}' panicked at stage {index} ({stage}): {message}")]
    StagePanicked {
        pipeline: String,
        stage: String,
        index: usize,
        message: String,
    },
}

impl PipelineError {
    /// Name of the stage that aborted the run
    pub fn stage(&self) -> &str {
        match self {
            PipelineError::StageFailed { stage, .. } | PipelineError::StagePanicked { stage, .. } => {
                stage
            }
        }
    }

    /// Zero-based position of the stage that aborted the run
    pub fn index(&self) -> usize {
        match self {
            PipelineError::StageFailed { index, .. } | PipelineError::StagePanicked { index, .. } => {
                *index
            }
        }
    }
}
