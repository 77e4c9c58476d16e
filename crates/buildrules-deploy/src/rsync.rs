//! Mirror a local directory to a remote host with rsync over ssh.

use std::path::{Component, Path, PathBuf};

use buildrules_rule::{CommandSpec, Rule};
use serde::Deserialize;

use crate::Deployer;

/// An rsync deployment declaration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsyncConfig {
    pub method: String,
    pub target_host: String,
    pub source: PathBuf,
    pub dest: String,
    /// Run rsync here, with `source` made relative to it.
    pub working_directory: Option<PathBuf>,
    /// Passed as `--chmod=<value>`.
    pub chmod_options: Option<String>,
    #[serde(default = "default_rsync_flags")]
    pub rsync_flags: String,
    #[serde(default = "default_ssh_command")]
    pub ssh_command: String,
    #[serde(default)]
    pub delete: bool,
}

fn default_rsync_flags() -> String {
    "-surlptDxv".to_owned()
}

fn default_ssh_command() -> String {
    "ssh".to_owned()
}

#[derive(Debug)]
pub struct RsyncDeployer {
    config: RsyncConfig,
}

impl RsyncDeployer {
    pub fn new(config: RsyncConfig) -> Self {
        Self { config }
    }

    /// `rsync <flags> [--chmod=..] -e <ssh> [--delete] <source>/ <host>:<dest>`
    pub fn command(&self) -> CommandSpec {
        let config = &self.config;
        let mut cmd = CommandSpec::new("rsync").arg(config.rsync_flags.as_str());
        if let Some(chmod) = &config.chmod_options {
            cmd = cmd.arg(format!("--chmod={chmod}"));
        }
        cmd = cmd.args(["-e", config.ssh_command.as_str()]);
        if config.delete {
            cmd = cmd.arg("--delete");
        }

        let source = match &config.working_directory {
            Some(dir) => {
                cmd = cmd.current_dir(dir);
                relative_to(&config.source, dir)
            }
            None => config.source.clone(),
        };
        let source = source.display().to_string();
        let source = if source.ends_with('/') {
            source
        } else {
            format!("{source}/")
        };
        cmd.arg(source)
            .arg(format!("{}:{}", config.target_host, config.dest))
    }
}

impl Deployer for RsyncDeployer {
    fn method(&self) -> &'static str {
        "rsync"
    }

    fn rules(&self) -> Vec<Rule> {
        vec![
            Rule::log(format!(
                "Deploying {} to {}:{} with rsync",
                self.config.source.display(),
                self.config.target_host,
                self.config.dest
            )),
            Rule::process(self.command()),
        ]
    }
}

/// Express `path` relative to `base` without touching the filesystem.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_parts: Vec<Component<'_>> = path.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(&base_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in base_parts.iter().skip(common) {
        relative.push("..");
    }
    for part in path_parts.iter().skip(common) {
        relative.push(part);
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    relative
}
