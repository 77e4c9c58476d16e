//! The three kinds of deferred work a plan is made of.

use std::fmt;

use buildrules_util::process::CommandSpec;
use tracing::info;

use crate::error::RuleError;

/// What an action returns. Any error type can be boxed into it.
pub type ActionResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type ActionFn = Box<dyn Fn() -> ActionResult>;

/// One unit of deferred work.
///
/// Describing a rule never has side effects; executing it may.
pub enum Rule {
    /// A progress message. Never fails.
    Log(String),
    /// An external command.
    Process(CommandSpec),
    /// A callable with its arguments captured when the plan was generated.
    Action {
        /// Short stable identifier, e.g. `copy-tree`.
        name: &'static str,
        /// Human-readable detail shown by describe.
        detail: String,
        op: ActionFn,
    },
}

/// The variant of a rule, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Log,
    Process,
    Action,
}

impl Rule {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log(message.into())
    }

    pub fn process(command: CommandSpec) -> Self {
        Self::Process(command)
    }

    /// Bind `op` as an action named `name`.
    pub fn action<F>(name: &'static str, detail: impl Into<String>, op: F) -> Self
    where
        F: Fn() -> ActionResult + 'static,
    {
        Self::Action {
            name,
            detail: detail.into(),
            op: Box::new(op),
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Log(_) => RuleKind::Log,
            Rule::Process(_) => RuleKind::Process,
            Rule::Action { .. } => RuleKind::Action,
        }
    }

    /// The action's name, or `None` for logs and processes.
    pub fn action_name(&self) -> Option<&'static str> {
        match self {
            Rule::Action { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The command of a process rule.
    pub fn command(&self) -> Option<&CommandSpec> {
        match self {
            Rule::Process(command) => Some(command),
            _ => None,
        }
    }

    /// One-line description of what executing this rule would do.
    pub fn describe(&self) -> String {
        match self {
            Rule::Log(message) => format!("log: {message}"),
            Rule::Process(command) => format!("run: {command}"),
            Rule::Action { name, detail, .. } => format!("{name}: {detail}"),
        }
    }

    /// Perform the rule's work.
    ///
    /// # Errors
    /// Returns `RuleError::Spawn` if a process cannot be started,
    /// `RuleError::ExitStatus` if it exits unsuccessfully, and
    /// `RuleError::Action` if an action returns an error.
    pub fn execute(&self) -> Result<(), RuleError> {
        match self {
            Rule::Log(message) => {
                info!("{message}");
                Ok(())
            }
            Rule::Process(command) => {
                info!(command = %command, "running");
                let exit = command.status()?;
                if exit.success {
                    Ok(())
                } else {
                    Err(RuleError::ExitStatus {
                        command: command.to_string(),
                        code: exit.exit_code,
                    })
                }
            }
            Rule::Action { op, .. } => op().map_err(RuleError::Action),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Log(message) => f.debug_tuple("Log").field(message).finish(),
            Rule::Process(command) => f.debug_tuple("Process").field(command).finish(),
            Rule::Action { name, detail, .. } => f
                .debug_struct("Action")
                .field("name", name)
                .field("detail", detail)
                .finish_non_exhaustive(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
