//! Error types for buildrules-rule.

/// Why a single rule failed.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// The process ran and exited unsuccessfully.
    #[error("`{command}` {}", exit_label(.code))]
    ExitStatus { command: String, code: Option<i32> },

    /// The process could not be started.
    #[error("{0}")]
    Spawn(#[from] buildrules_util::error::UtilError),

    /// An action returned an error.
    #[error("{0}")]
    Action(Box<dyn std::error::Error + Send + Sync>),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_owned(),
    }
}

/// A rule failed while a plan was running. The run stopped at this rule.
#[derive(Debug, thiserror::Error)]
#[error("rule {position} failed ({description}): {source}")]
pub struct ExecutionError {
    /// 1-based position of the failing rule in the plan.
    pub position: usize,
    /// The failing rule's description.
    pub description: String,
    pub source: RuleError,
}
