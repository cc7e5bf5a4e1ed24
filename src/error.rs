//! Error taxonomy for the detection pipeline.

use thiserror::Error;

/// Errors raised by pipeline stages and the controller.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad label or model resource, or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("class id {class_id} outside label table of {len} entries")]
    Index { class_id: usize, len: usize },

    /// Camera unavailable or requested mode unsupported.
    #[error("device error: {0}")]
    Device(String),

    /// Transient grab failure. The controller skips the iteration.
    #[error("capture error: {0}")]
    Capture(String),

    #[error("frame source reached end of stream")]
    EndOfStream,

    #[error("model load error: {0}")]
    ModelLoad(String),

    #[error("inference error: {0}")]
    Inference(String),

    /// Tensor or buffer shape violates the single-image batch contract.
    #[error("shape error: {0}")]
    Shape(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is not running")]
    NotRunning,
}

impl PipelineError {
    /// True for errors that only invalidate the current loop iteration.
    pub fn is_iteration_local(&self) -> bool {
        matches!(
            self,
            PipelineError::Capture(_)
                | PipelineError::Shape(_)
                | PipelineError::Inference(_)
                | PipelineError::Encode(_)
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_local_errors_are_classified() {
        assert!(PipelineError::Capture("grab".into()).is_iteration_local());
        assert!(PipelineError::Shape("rank".into()).is_iteration_local());
        assert!(!PipelineError::ModelLoad("corrupt".into()).is_iteration_local());
        assert!(!PipelineError::EndOfStream.is_iteration_local());
        assert!(!PipelineError::AlreadyRunning.is_iteration_local());
    }

    #[test]
    fn index_error_names_the_range() {
        let err = PipelineError::Index {
            class_id: 3,
            len: 3,
        };
        assert_eq!(
            err.to_string(),
            "class id 3 outside label table of 3 entries"
        );
    }
}
