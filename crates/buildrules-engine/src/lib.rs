//! Fingerprinting, target classification and plan generation for buildrules.

pub mod conda;
pub mod error;
pub mod fingerprint;
pub mod generator;
pub mod modulefile;
pub mod singularity;

pub use conda::CondaBuilder;
pub use error::EngineError;
pub use fingerprint::{Fingerprint, PathKeys};
pub use generator::{generate_plan, Classification, PlanGenerator, PlannedRun, Target};
pub use singularity::SingularityBuilder;
