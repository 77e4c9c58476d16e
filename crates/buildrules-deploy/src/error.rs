//! Error types for buildrules-deploy.

/// Errors produced while validating or running deployments.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A deployment declaration has no `method` key.
    #[error("deployment {index} does not name a method")]
    MissingMethod { index: usize },

    /// A deployment names a method nobody implements.
    #[error("deployment {index} uses unknown method `{method}` (expected one of: {known})")]
    UnknownMethod {
        index: usize,
        method: String,
        known: String,
    },

    /// A declaration does not match its method's schema.
    #[error("invalid {method} deployment {index}: {message}")]
    Validation {
        index: usize,
        method: &'static str,
        message: String,
    },

    /// A referenced document is missing or invalid.
    #[error("{0}")]
    Config(#[from] buildrules_config::ConfigError),

    /// A filesystem or process operation failed.
    #[error("{0}")]
    Util(#[from] buildrules_util::error::UtilError),

    /// The destination container cannot be reached.
    #[error("container {container} is not accessible: {message}")]
    ContainerUnavailable { container: String, message: String },

    /// One or more objects were not uploaded.
    #[error("failed to upload {} object(s) to {container}: {}", failed.len(), failed.join(", "))]
    UploadFailure {
        container: String,
        failed: Vec<String>,
    },
}
