//! Error types for model construction and inference.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QcnnError>;

/// Everything that can go wrong while building or running a pipeline.
///
/// Almost all variants are raised while a model is being assembled; at run
/// time only image-size and stage failures can occur.
#[derive(Debug, Error)]
pub enum QcnnError {
    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch { what: String, expected: String, actual: String },

    #[error("threshold ladder for channel {channel} has {actual} entries, expected {expected}")]
    LadderLength { channel: usize, expected: usize, actual: usize },

    #[error("threshold ladder for channel {channel} is not strictly ascending at index {index}")]
    NonMonotonicLadder { channel: usize, index: usize },

    #[error("code magnitude {magnitude} out of range (max {max})")]
    CodeOutOfRange { magnitude: u8, max: u8 },

    #[error("invalid code scheme: {0}")]
    InvalidScheme(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("accumulator needs {required} bits, only {available} available ({what})")]
    AccumulatorTooNarrow { what: String, required: u32, available: u32 },

    #[error("image has {actual} codes, expected {expected}")]
    ImageSize { expected: usize, actual: usize },

    #[error("invalid layer sequence: {0}")]
    LayerSequence(String),

    #[error("pipeline stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error("classification cancelled")]
    Cancelled,
}

impl QcnnError {
    pub fn shape(what: impl Into<String>, expected: impl ToString, actual: impl ToString) -> Self {
        Self::ShapeMismatch { what: what.into(), expected: expected.to_string(), actual: actual.to_string() }
    }

    pub fn geometry(reason: impl Into<String>) -> Self { Self::InvalidGeometry(reason.into()) }

    pub fn stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StageFailed { stage: stage.into(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shape_mismatch() {
        let e = QcnnError::shape("conv weights", "3x3x1", "3x3x2");
        assert_eq!(e.to_string(), "shape mismatch in conv weights: expected 3x3x1, got 3x3x2");
    }

    #[test]
    fn display_ladder_errors() {
        let e = QcnnError::NonMonotonicLadder { channel: 2, index: 1 };
        assert_eq!(e.to_string(), "threshold ladder for channel 2 is not strictly ascending at index 1");
        let e = QcnnError::LadderLength { channel: 0, expected: 3, actual: 2 };
        assert!(e.to_string().contains("has 2 entries"));
    }
}
