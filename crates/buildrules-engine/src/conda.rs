//! Conda environments installed from Miniconda/Anaconda installers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use buildrules_config::conda::{CondaConfig, EnvironmentSpec};
use buildrules_config::{BuilderPaths, GlobalOptions};
use buildrules_rule::{ActionResult, CommandSpec, Rule};
use buildrules_util::error::UtilError;
use serde::Deserialize;
use tracing::info;

use crate::error::EngineError;
use crate::fingerprint::Fingerprint;
use crate::generator::{BuildRules, PlanGenerator, Target, TargetLayout};
use crate::modulefile::{self, lua_quote, ModuleFile};

/// Name of the installed-state document inside the install path.
pub const STATE_FILE: &str = "installed_environments.toml";

const MODULE_TEMPLATE: &str = r#"-- Generated by buildrules. Changes are overwritten on the next build.
help([[{{ help }}]])

whatis("Name: {{ name }}")
whatis("Version: {{ version }}")

prepend_path("PATH", "{{ bin }}")
setenv("CONDA_ENV_ROOT", "{{ root }}")
"#;

/// Plan generator for conda environments.
#[derive(Debug)]
pub struct CondaBuilder {
    config: CondaConfig,
    paths: BuilderPaths,
    options: GlobalOptions,
    host_path: Vec<PathBuf>,
}

impl CondaBuilder {
    /// `host_path` is appended after the environment's `bin` directory in the
    /// `PATH` given to conda and pip.
    pub fn new(
        config: CondaConfig,
        paths: BuilderPaths,
        options: GlobalOptions,
        host_path: Vec<PathBuf>,
    ) -> Self {
        Self {
            config,
            paths,
            options,
            host_path,
        }
    }

    /// Path of the installed-state document.
    pub fn state_path(&self) -> PathBuf {
        self.paths.install_path.join(STATE_FILE)
    }

    fn installer_path(&self, env: &EnvironmentSpec) -> PathBuf {
        self.paths.source_cache.join(env.installer_file())
    }

    fn expected_checksum(&self, env: &EnvironmentSpec) -> Option<String> {
        self.config
            .installer_checksums
            .get(&env.installer_file())
            .cloned()
    }

    /// `PATH` for processes running inside the staged environment.
    fn env_path(&self, stage: &Path) -> String {
        std::iter::once(stage.join("bin"))
            .chain(self.host_path.iter().cloned())
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl PlanGenerator for CondaBuilder {
    type Entry = EnvironmentSpec;

    fn kind(&self) -> &'static str {
        "environment"
    }

    fn paths(&self) -> &BuilderPaths {
        &self.paths
    }

    fn update_cleanup(&self) -> bool {
        self.options.update_cleanup
    }

    fn entries(&self) -> &[EnvironmentSpec] {
        &self.config.environments
    }

    fn target(&self, env: &EnvironmentSpec) -> Result<Target, EngineError> {
        Ok(Target {
            name: env.name.clone(),
            version: env.version.clone(),
            fingerprint: Fingerprint::of(env)?,
        })
    }

    /// A cached installer must match its declared checksum.
    fn preflight(&self, env: &EnvironmentSpec, target: &Target) -> Result<(), EngineError> {
        let installer = self.installer_path(env);
        let Some(expected) = self.expected_checksum(env) else {
            return Ok(());
        };
        if !installer.is_file() {
            return Ok(());
        }
        match buildrules_util::hash::verify_file(&installer, &expected) {
            Ok(_) => Ok(()),
            Err(UtilError::ChecksumMismatch {
                path,
                expected,
                actual,
            }) => Err(EngineError::ChecksumMismatch {
                target: target.identifier(),
                path,
                expected,
                actual,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn build_rules(
        &self,
        env: &EnvironmentSpec,
        target: &Target,
        layout: &TargetLayout,
    ) -> Result<BuildRules, EngineError> {
        let installer = self.installer_path(env);
        let stage = self
            .paths
            .build_stage
            .join(format!("{}-{}-{}", env.name, env.version, layout.key));
        let env_path = self.env_path(&stage);
        let mut rules = Vec::new();

        let url = env.installer_url();
        let expected = self.expected_checksum(env);
        let fetch_dest = installer.clone();
        rules.push(Rule::action(
            "fetch-installer",
            format!("{url} -> {}", installer.display()),
            move || fetch_installer(&url, &fetch_dest, expected.as_deref()),
        ));

        let prepare_stage = stage.clone();
        let install_parent = layout
            .install_path
            .parent()
            .map_or_else(|| layout.install_path.clone(), Path::to_path_buf);
        let module_dir = self.paths.module_path.join(&env.name);
        rules.push(Rule::action(
            "prepare-paths",
            format!(
                "clean {}, create {} and {}",
                stage.display(),
                install_parent.display(),
                module_dir.display()
            ),
            move || {
                buildrules_util::fs::remove_dir_all_if_exists(&prepare_stage)?;
                buildrules_util::fs::ensure_dir(&install_parent)?;
                buildrules_util::fs::ensure_dir(&module_dir)?;
                Ok(())
            },
        ));

        rules.push(Rule::process(
            CommandSpec::new("bash")
                .path_arg(&installer)
                .args(["-f", "-b", "-p"])
                .path_arg(&stage),
        ));

        let info = CommandSpec::new(stage.join("bin").join("conda").display().to_string())
            .args(["info", "--json"])
            .env("PATH", env_path.as_str());
        let condarc = stage.join("condarc");
        rules.push(Rule::action(
            "verify-condarc",
            format!("only {} is used", condarc.display()),
            move || verify_condarc(&info, &condarc),
        ));

        if !env.conda_packages.is_empty() {
            rules.push(Rule::process(
                CommandSpec::new(stage.join("bin").join("conda").display().to_string())
                    .args(["install", "--yes", "-n", "base"])
                    .args(env.conda_packages.iter().cloned())
                    .env("PATH", env_path.as_str()),
            ));
        }

        if !env.pip_packages.is_empty() {
            rules.push(Rule::process(
                CommandSpec::new(stage.join("bin").join("pip").display().to_string())
                    .arg("install")
                    .args(env.pip_packages.iter().cloned())
                    .env("PATH", env_path.as_str()),
            ));
        }

        let copy_dest = layout.install_path.clone();
        rules.push(Rule::action(
            "copy-tree",
            format!("{} -> {}", stage.display(), copy_dest.display()),
            move || {
                buildrules_util::fs::copy_tree(&stage, &copy_dest)?;
                Ok(())
            },
        ));

        info!(id = %target.identifier(), rules = rules.len(), "prepared conda build");
        Ok(BuildRules {
            rules,
            params: BTreeMap::from([
                ("installer".to_owned(), env.installer_file()),
                ("python".to_owned(), env.python_version.to_string()),
            ]),
        })
    }

    fn module_file(
        &self,
        env: &EnvironmentSpec,
        target: &Target,
        install_path: &Path,
        _params: &BTreeMap<String, String>,
    ) -> Result<ModuleFile, EngineError> {
        let help = env
            .help
            .clone()
            .unwrap_or_else(|| format!("Conda environment {}", target.identifier()));
        let vars = BTreeMap::from([
            ("help", help.replace("]]", "] ]")),
            ("name", lua_quote(&target.name)),
            ("version", lua_quote(&target.version)),
            ("bin", lua_quote(&install_path.join("bin").display().to_string())),
            ("root", lua_quote(&install_path.display().to_string())),
        ]);
        let content =
            modulefile::render(MODULE_TEMPLATE, &vars).map_err(|source| EngineError::Template {
                target: target.identifier(),
                source,
            })?;
        Ok(ModuleFile {
            path: ModuleFile::location(&self.paths.module_path, &target.name, &target.version),
            content,
        })
    }
}

fn fetch_installer(url: &str, dest: &Path, expected: Option<&str>) -> ActionResult {
    let fetched = buildrules_util::download::fetch_verified(url, dest, expected)?;
    if fetched.downloaded {
        info!(path = %fetched.path.display(), sha256 = %fetched.sha256, "downloaded installer");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CondaInfo {
    #[serde(default)]
    config_files: Vec<PathBuf>,
}

/// Fail unless conda reads no configuration file other than `condarc`.
fn verify_condarc(info: &CommandSpec, condarc: &Path) -> ActionResult {
    let output = info.output()?;
    if !output.success {
        return Err(format!("`{info}` failed: {}", output.stderr.trim()).into());
    }
    let parsed: CondaInfo = serde_json::from_str(&output.stdout)?;
    check_config_files(&parsed.config_files, condarc)
}

fn check_config_files(files: &[PathBuf], condarc: &Path) -> ActionResult {
    match files {
        [] => Ok(()),
        [only] if only == condarc => Ok(()),
        [only] => Err(format!(
            "conda uses {} instead of the environment's own {}",
            only.display(),
            condarc.display()
        )
        .into()),
        many => Err(format!(
            "conda uses too many configuration files: {}",
            many.iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
        .into()),
    }
}
