//! Error types for the reactive engine.

use thiserror::Error;

use crate::graph::CellId;

/// Errors surfaced by cell operations and propagation passes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    /// The cell was disposed and can no longer be read or written.
    #[error("cell {0} has been disposed")]
    Disposed(CellId),

    /// A cell was read again while its own computation was running.
    #[error("cyclic dependency detected at cell {0}")]
    CyclicDependency(CellId),

    /// Follow-up passes kept being scheduled past the configured limit.
    #[error("propagation did not settle after {passes} passes")]
    PropagationLimit { passes: usize },

    /// A cell has no value to hand out.
    #[error("cell {0} has no value")]
    Empty(CellId),

    /// A user computation failed.
    #[error("computation failed: {0}")]
    Computation(String),
}

impl CellError {
    /// Wrap a failure raised inside a computation.
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation(message.into())
    }
}

/// Errors raised while loading or applying an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_cell() {
        let id = CellId::from(7);
        assert_eq!(
            CellError::Disposed(id).to_string(),
            "cell #7 has been disposed"
        );
        assert_eq!(
            CellError::CyclicDependency(id).to_string(),
            "cyclic dependency detected at cell #7"
        );
    }

    #[test]
    fn parse_errors_convert() {
        let err: ConfigError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
