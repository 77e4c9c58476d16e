//! Deployment strategies that publish built artifacts, and the dispatcher
//! that selects them from `[[deployment]]` declarations.

pub mod error;
pub mod rsync;
pub mod swift;

use buildrules_rule::{Plan, Rule};
use tracing::debug;

pub use error::DeployError;
pub use rsync::{RsyncConfig, RsyncDeployer};
pub use swift::{ObjectStore, SwiftConfig, SwiftDeployer};

/// A deployment strategy.
pub trait Deployer: std::fmt::Debug {
    /// The `method` value that selects this strategy.
    fn method(&self) -> &'static str;

    /// Rules that perform the deployment when executed.
    fn rules(&self) -> Vec<Rule>;
}

/// Every supported `method` value.
pub const METHODS: [&str; 2] = ["rsync", "swift"];

/// A declaration that matched its method's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deployment {
    Rsync(RsyncConfig),
    Swift(SwiftConfig),
}

impl Deployment {
    /// Validate declaration number `index` against its method's schema.
    ///
    /// # Errors
    /// Returns `MissingMethod`, `UnknownMethod` or `Validation`.
    pub fn from_table(index: usize, table: &toml::Table) -> Result<Self, DeployError> {
        let method = table
            .get("method")
            .and_then(toml::Value::as_str)
            .ok_or(DeployError::MissingMethod { index })?;
        let value = toml::Value::Table(table.clone());
        match method {
            "rsync" => value
                .try_into()
                .map(Deployment::Rsync)
                .map_err(|e| invalid(index, "rsync", &e)),
            "swift" => value
                .try_into()
                .map(Deployment::Swift)
                .map_err(|e| invalid(index, "swift", &e)),
            other => Err(DeployError::UnknownMethod {
                index,
                method: other.to_owned(),
                known: METHODS.join(", "),
            }),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Deployment::Rsync(_) => "rsync",
            Deployment::Swift(_) => "swift",
        }
    }

    /// Create the strategy for this declaration.
    ///
    /// # Errors
    /// Returns an error if the strategy cannot be set up, e.g. its secrets
    /// file is unreadable.
    pub fn instantiate(self) -> Result<Box<dyn Deployer>, DeployError> {
        Ok(match self {
            Deployment::Rsync(config) => Box::new(RsyncDeployer::new(config)),
            Deployment::Swift(config) => Box::new(SwiftDeployer::new(config)?),
        })
    }
}

fn invalid(index: usize, method: &'static str, error: &toml::de::Error) -> DeployError {
    DeployError::Validation {
        index,
        method,
        message: error.message().to_owned(),
    }
}

/// Validate every declaration, in order. Declarations are numbered from 1.
///
/// # Errors
/// Returns the first validation failure.
pub fn validate_all(tables: &[toml::Table]) -> Result<Vec<Deployment>, DeployError> {
    tables
        .iter()
        .enumerate()
        .map(|(i, table)| Deployment::from_table(i.saturating_add(1), table))
        .collect()
}

/// Validate all declarations, then instantiate their strategies.
///
/// Nothing is instantiated unless every declaration is valid.
///
/// # Errors
/// Returns the first validation or setup failure.
pub fn deployers(tables: &[toml::Table]) -> Result<Vec<Box<dyn Deployer>>, DeployError> {
    let validated = validate_all(tables)?;
    validated
        .into_iter()
        .map(|deployment| {
            debug!(method = deployment.method(), "instantiating deployer");
            deployment.instantiate()
        })
        .collect()
}

/// The rules of every declared deployment, in declaration order.
///
/// # Errors
/// Returns the first validation or setup failure.
pub fn deployment_plan(tables: &[toml::Table]) -> Result<Plan, DeployError> {
    let mut plan = Plan::new();
    for deployer in deployers(tables)? {
        plan.extend(deployer.rules());
    }
    Ok(plan)
}
