use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::document::{self, check_path_component, ConfigError};

/// The conda `build_config.toml` targets document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CondaConfig {
    /// Expected SHA-256 per installer file name.
    #[serde(default)]
    pub installer_checksums: BTreeMap<String, String>,
    #[serde(default)]
    pub environments: Vec<EnvironmentSpec>,
}

/// One declared conda environment, with defaults filled in.
///
/// Defaults are applied during deserialization, so an omitted field and the
/// same value written out explicitly produce identical entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSpec {
    pub name: String,
    pub version: String,
    #[serde(default = "default_miniconda")]
    pub miniconda: bool,
    #[serde(default = "default_python_version")]
    pub python_version: u8,
    #[serde(default = "default_installer_version")]
    pub installer_version: String,
    #[serde(default, alias = "packages")]
    pub conda_packages: Vec<String>,
    #[serde(default)]
    pub pip_packages: Vec<String>,
    /// Module help text. Display only, never part of the fingerprint.
    #[serde(default, skip_serializing)]
    pub help: Option<String>,
}

fn default_miniconda() -> bool {
    true
}

fn default_python_version() -> u8 {
    3
}

fn default_installer_version() -> String {
    "latest".to_owned()
}

impl EnvironmentSpec {
    /// The logical identifier `name/version`.
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    /// File name of the installer this environment bootstraps from.
    pub fn installer_file(&self) -> String {
        let flavor = if self.miniconda { "Miniconda" } else { "Anaconda" };
        format!(
            "{flavor}{}-{}-Linux-x86_64.sh",
            self.python_version, self.installer_version
        )
    }

    /// Download URL of the installer.
    pub fn installer_url(&self) -> String {
        let channel = if self.miniconda { "miniconda" } else { "archive" };
        format!("https://repo.anaconda.com/{channel}/{}", self.installer_file())
    }
}

impl CondaConfig {
    /// Read and validate the targets document at `path`.
    ///
    /// # Errors
    /// Returns an error if the document cannot be read, does not match the
    /// schema, or fails validation.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = document::load(path)?;
        config.validate(path)?;
        Ok(config)
    }

    /// Check the constraints serde cannot express.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` naming the first offending entry.
    pub fn validate(&self, origin: &Path) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for env in &self.environments {
            check_path_component(origin, "environment name", &env.name)?;
            check_path_component(origin, "environment version", &env.version)?;
            check_path_component(origin, "installer_version", &env.installer_version)?;
            if !(2..=3).contains(&env.python_version) {
                return Err(ConfigError::invalid(
                    origin,
                    format!(
                        "environment {}: python_version must be 2 or 3, got {}",
                        env.identifier(),
                        env.python_version
                    ),
                ));
            }
            if !seen.insert(env.identifier()) {
                return Err(ConfigError::invalid(
                    origin,
                    format!("environment {} is declared more than once", env.identifier()),
                ));
            }
        }
        Ok(())
    }
}
