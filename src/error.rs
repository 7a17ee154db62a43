use thiserror::Error;

/// Failure taxonomy for the compositing and brush core.
///
/// `Validation` and `DimensionMismatch` surface synchronously before any
/// state is mutated; `Resource` failures are recovered locally with a
/// placeholder and logged; `State` rejects operations that are invalid in
/// the current state machine state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unreadable source `{path}`: {reason}")]
    Resource { path: String, reason: String },

    #[error("dimension mismatch: expected {expected_w}x{expected_h}, got {actual_w}x{actual_h}")]
    DimensionMismatch {
        expected_w: u32,
        expected_h: u32,
        actual_w: u32,
        actual_h: u32,
    },

    #[error("invalid operation: {0}")]
    State(String),
}

impl EngineError {
    /// Shorthand for a dimension mismatch between an expected and actual size.
    pub fn dimensions(expected: (u32, u32), actual: (u32, u32)) -> Self {
        Self::DimensionMismatch {
            expected_w: expected.0,
            expected_h: expected.1,
            actual_w: actual.0,
            actual_h: actual.1,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
