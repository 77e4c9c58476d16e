//! Error types for buildrules-util.

/// Errors produced by utility functions.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    /// An I/O operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A glob pattern was invalid.
    #[error("invalid glob pattern `{pattern}`: {message}")]
    GlobPattern { pattern: String, message: String },

    /// A command could not be started.
    #[error("cannot execute `{program}`: {source}")]
    CommandExec {
        program: String,
        source: std::io::Error,
    },

    /// A download failed.
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    /// A file's SHA-256 does not match the expected value.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// A value could not be serialized for hashing.
    #[error("cannot serialize value for hashing: {message}")]
    Serialize { message: String },

    /// Cannot determine the user's home directory.
    #[error("cannot determine home directory, set the HOME environment variable")]
    NoHomeDir,
}
