//! Upload a directory tree into an OpenStack Swift container.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use buildrules_config::auth::OsSecrets;
use buildrules_rule::{CommandSpec, Rule};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::DeployError;
use crate::Deployer;

/// A swift deployment declaration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwiftConfig {
    pub method: String,
    pub dest_container: String,
    pub source: PathBuf,
    /// Replaces the first occurrence of `source` in every object name.
    pub source_replacement: Option<String>,
    pub os_secrets_file: PathBuf,
}

/// One object to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUnit {
    /// Local file, or the local empty directory for a marker.
    pub path: PathBuf,
    /// Object name in the container.
    pub name: String,
    pub dir_marker: bool,
}

impl UploadUnit {
    pub fn is_dir_marker(&self) -> bool {
        self.dir_marker
    }
}

/// Result of creating one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub name: String,
    pub success: bool,
    pub message: Option<String>,
}

/// The operations a deployment needs from an object store.
pub trait ObjectStore {
    /// Check that `container` exists and is accessible.
    ///
    /// # Errors
    /// Returns `DeployError::ContainerUnavailable` if it is not.
    fn stat_container(&self, container: &str) -> Result<(), DeployError>;

    /// Create every unit, reporting each outcome. Never stops early.
    fn upload(&self, container: &str, units: &[UploadUnit]) -> Vec<UploadOutcome>;
}

/// Walk `source` into upload units, sorted by path.
///
/// Every regular file becomes an object and every empty directory a
/// directory marker. Names are the full paths, with the first occurrence of
/// `source` replaced by `replacement` when given.
///
/// # Errors
/// Returns an error if the tree cannot be walked.
pub fn upload_units(source: &Path, replacement: Option<&str>) -> Result<Vec<UploadUnit>, DeployError> {
    let source_text = source.display().to_string();
    let rename = |path: &Path| {
        let name = path.display().to_string();
        match replacement {
            Some(with) => name.replacen(&source_text, with, 1),
            None => name,
        }
    };

    let mut units = Vec::new();
    for entry in walkdir::WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| buildrules_util::error::UtilError::Io {
            path: source_text.clone(),
            source: e.into(),
        })?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            let mut children = std::fs::read_dir(path).map_err(|source| {
                buildrules_util::error::UtilError::Io {
                    path: path.display().to_string(),
                    source,
                }
            })?;
            if children.next().is_none() {
                units.push(UploadUnit {
                    path: path.to_path_buf(),
                    name: rename(path),
                    dir_marker: true,
                });
            }
        } else if entry.file_type().is_file() {
            units.push(UploadUnit {
                path: path.to_path_buf(),
                name: rename(path),
                dir_marker: false,
            });
        }
    }
    Ok(units)
}

/// Check the container, upload every unit and fail if any unit failed.
///
/// # Errors
/// Returns `DeployError::ContainerUnavailable` before uploading anything if
/// the container is not accessible, and `DeployError::UploadFailure` listing
/// every failed object otherwise.
pub fn deploy(store: &dyn ObjectStore, config: &SwiftConfig) -> Result<usize, DeployError> {
    info!(container = %config.dest_container, "verifying access to destination container");
    store.stat_container(&config.dest_container)?;

    let units = upload_units(&config.source, config.source_replacement.as_deref())?;
    info!(
        container = %config.dest_container,
        objects = units.len(),
        "uploading objects"
    );
    let outcomes = store.upload(&config.dest_container, &units);

    let failed: Vec<String> = outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| {
            warn!(object = %o.name, message = o.message.as_deref().unwrap_or(""), "upload failed");
            o.name.clone()
        })
        .collect();
    if !failed.is_empty() {
        return Err(DeployError::UploadFailure {
            container: config.dest_container.clone(),
            failed,
        });
    }
    Ok(outcomes.len())
}

/// [`ObjectStore`] backed by the `swift` command-line client.
#[derive(Debug, Clone)]
pub struct SwiftCli {
    secrets: OsSecrets,
}

impl SwiftCli {
    pub fn new(secrets: OsSecrets) -> Self {
        Self { secrets }
    }

    fn command(&self) -> CommandSpec {
        let mut cmd = CommandSpec::new("swift");
        for (key, value) in self.secrets.client_env() {
            cmd = if key == "OS_PASSWORD" {
                cmd.secret_env(key, value)
            } else {
                cmd.env(key, value)
            };
        }
        cmd
    }

    /// The `swift upload` invocation for one unit.
    ///
    /// The local argument is always an on-disk path. Uploading an empty
    /// directory creates a directory marker named by `--object-name`.
    pub fn upload_command(&self, container: &str, unit: &UploadUnit) -> CommandSpec {
        self.command()
            .args(["upload", "--object-name", unit.name.as_str(), container])
            .path_arg(&unit.path)
    }
}

impl ObjectStore for SwiftCli {
    fn stat_container(&self, container: &str) -> Result<(), DeployError> {
        let output = self.command().args(["stat", container]).output()?;
        if output.success {
            Ok(())
        } else {
            Err(DeployError::ContainerUnavailable {
                container: container.to_owned(),
                message: output.stderr.trim().to_owned(),
            })
        }
    }

    fn upload(&self, container: &str, units: &[UploadUnit]) -> Vec<UploadOutcome> {
        units
            .iter()
            .map(|unit| {
                let kind = if unit.is_dir_marker() { "directory marker" } else { "object" };
                info!(object = %unit.name, "uploading {kind}");
                match self.upload_command(container, unit).output() {
                    Ok(output) => UploadOutcome {
                        name: unit.name.clone(),
                        success: output.success,
                        message: (!output.success).then(|| output.stderr.trim().to_owned()),
                    },
                    Err(e) => UploadOutcome {
                        name: unit.name.clone(),
                        success: false,
                        message: Some(e.to_string()),
                    },
                }
            })
            .collect()
    }
}

pub struct SwiftDeployer {
    config: SwiftConfig,
    store: Rc<dyn ObjectStore>,
}

impl std::fmt::Debug for SwiftDeployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwiftDeployer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SwiftDeployer {
    /// Read the secrets file named by `config` and use the `swift` client.
    ///
    /// # Errors
    /// Returns an error if the secrets file is missing or incomplete.
    pub fn new(config: SwiftConfig) -> Result<Self, DeployError> {
        let secrets = OsSecrets::from_path(&config.os_secrets_file)?;
        Ok(Self::with_store(config, Rc::new(SwiftCli::new(secrets))))
    }

    pub fn with_store(config: SwiftConfig, store: Rc<dyn ObjectStore>) -> Self {
        Self { config, store }
    }
}

impl Deployer for SwiftDeployer {
    fn method(&self) -> &'static str {
        "swift"
    }

    fn rules(&self) -> Vec<Rule> {
        let config = self.config.clone();
        let store = Rc::clone(&self.store);
        vec![
            Rule::log(format!(
                "Deploying {} to swift container {}",
                self.config.source.display(),
                self.config.dest_container
            )),
            Rule::action(
                "swift-upload",
                format!(
                    "{} -> {}",
                    self.config.source.display(),
                    self.config.dest_container
                ),
                move || {
                    deploy(store.as_ref(), &config)?;
                    Ok(())
                },
            ),
        ]
    }
}
