//! Deferred units of work and the engine that describes or runs them in order.

pub mod engine;
pub mod error;
pub mod plan;
pub mod rule;

pub use buildrules_util::process::CommandSpec;
pub use engine::{describe, run, RunSummary};
pub use error::{ExecutionError, RuleError};
pub use plan::Plan;
pub use rule::{ActionResult, Rule, RuleKind};
