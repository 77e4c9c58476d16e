//! Sequential, fail-fast plan execution and dry describe output.

use std::io::Write;

use tracing::{debug, info};

use crate::error::ExecutionError;
use crate::plan::Plan;

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of rules executed.
    pub executed: usize,
}

/// Write every rule's description to `out`, numbered from 1. Runs nothing.
///
/// # Errors
/// Returns an error if writing to `out` fails.
pub fn describe(plan: &Plan, out: &mut impl Write) -> std::io::Result<()> {
    let width = plan.len().to_string().len();
    for (index, rule) in plan.iter().enumerate() {
        writeln!(out, "{:>width$}. {}", index.saturating_add(1), rule.describe())?;
    }
    Ok(())
}

/// Execute the rules of `plan` strictly in order.
///
/// Stops at the first failing rule. Rules that already ran are not undone;
/// plans are built so that running them again after a fix is safe.
///
/// # Errors
/// Returns `ExecutionError` naming the failing rule and its 1-based position.
pub fn run(plan: &Plan) -> Result<RunSummary, ExecutionError> {
    info!(rules = plan.len(), "executing plan");
    for (index, rule) in plan.iter().enumerate() {
        let position = index.saturating_add(1);
        debug!(position, rule = %rule, "executing rule");
        rule.execute().map_err(|source| ExecutionError {
            position,
            description: rule.describe(),
            source,
        })?;
    }
    Ok(RunSummary {
        executed: plan.len(),
    })
}
