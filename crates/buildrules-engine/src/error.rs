//! Error types for buildrules-engine.

use crate::modulefile::TemplateError;

/// Errors produced while generating a build plan.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A configuration document is missing or invalid.
    #[error("{0}")]
    Config(#[from] buildrules_config::ConfigError),

    /// The installed-state document cannot be used.
    #[error("{0}")]
    State(#[from] buildrules_config::StateError),

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] buildrules_util::error::UtilError),

    /// A cached installer does not match its declared checksum.
    #[error("installer for {target} at {path} failed verification: expected {expected}, got {actual}")]
    ChecksumMismatch {
        target: String,
        path: String,
        expected: String,
        actual: String,
    },

    /// A module file template could not be rendered.
    #[error("cannot render module file for {target}: {source}")]
    Template {
        target: String,
        source: TemplateError,
    },
}
