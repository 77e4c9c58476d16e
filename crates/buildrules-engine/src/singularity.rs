//! Singularity images built from Docker bases and generated definition files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use buildrules_config::auth::AuthFile;
use buildrules_config::image::{merge_commands, merge_flags, CommandSection, ImageConfig};
use buildrules_config::settings::resolve_flag;
use buildrules_config::{BuilderPaths, GlobalOptions};
use buildrules_rule::{CommandSpec, Rule};
use serde::Serialize;
use tracing::debug;

use crate::error::EngineError;
use crate::fingerprint::Fingerprint;
use crate::generator::{BuildRules, PlanGenerator, Target, TargetLayout};
use crate::modulefile::{self, lua_quote, ModuleFile};

/// Name of the installed-state document inside the install path.
pub const STATE_FILE: &str = "installed_images.toml";

const MODULE_TEMPLATE: &str = r#"-- Generated by buildrules. Changes are overwritten on the next build.
help([[{{ help }}]])

whatis("Name: {{ name }}")
whatis("Version: {{ version }}")

prepend_path("PATH", "{{ bin }}")
setenv("SINGULARITY_IMAGE", "{{ image }}")
setenv("SINGULARITY_FLAGS", "{{ flags }}")
"#;

/// One image to build: a definition expanded for a single tag.
///
/// Only the fields that change the built image take part in the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    pub name: String,
    pub tag: String,
    pub docker_user: String,
    pub docker_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    pub commands: BTreeMap<CommandSection, Vec<String>>,
    pub flags: Vec<String>,
    pub fakeroot: bool,
    #[serde(skip)]
    pub debug: bool,
    #[serde(skip)]
    pub sudo: bool,
    #[serde(skip)]
    pub help: Option<String>,
}

impl ImageEntry {
    /// `<docker_user>/<docker_image>:<tag>`.
    pub fn docker_url(&self) -> String {
        format!("{}/{}:{}", self.docker_user, self.docker_image, self.tag)
    }

    /// Contents of the definition file for this image.
    pub fn definition(&self) -> String {
        let mut out = format!("Bootstrap: docker\nFrom: {}\n", self.docker_url());
        if let Some(registry) = &self.registry {
            out.push_str(&format!("Registry: {registry}\n"));
        }
        for (section, commands) in &self.commands {
            out.push_str(&format!("\n%{}\n", section.as_str()));
            for command in commands {
                out.push_str(&format!("    {command}\n"));
            }
        }
        out
    }
}

/// Expand every definition into one entry per tag, in declaration order.
///
/// Per-definition options override the builder-wide ones.
///
/// # Errors
/// Returns an error if a definition names an unknown command or flag collection.
pub fn expand(config: &ImageConfig, options: &GlobalOptions) -> Result<Vec<ImageEntry>, EngineError> {
    let mut entries = Vec::new();
    for def in &config.definitions {
        let commands = merge_commands(&config.command_collections, &def.command_collections)?;
        let flags = merge_flags(&config.flag_collections, &def.flag_collections)?;
        for tag in &def.tags {
            entries.push(ImageEntry {
                name: def.name.clone(),
                tag: tag.clone(),
                docker_user: def.docker_user().to_owned(),
                docker_image: def.docker_image().to_owned(),
                registry: def.registry.clone(),
                commands: commands.clone(),
                flags: flags.clone(),
                fakeroot: resolve_flag(def.fakeroot, options.fakeroot),
                debug: resolve_flag(def.debug, options.debug),
                sudo: resolve_flag(def.sudo, options.sudo),
                help: def.help.clone(),
            });
        }
    }
    Ok(entries)
}

/// Plan generator for singularity images.
#[derive(Debug)]
pub struct SingularityBuilder {
    entries: Vec<ImageEntry>,
    paths: BuilderPaths,
    options: GlobalOptions,
    auths: AuthFile,
    uid: u32,
    program: String,
}

impl SingularityBuilder {
    /// `uid` owns images built with `sudo`.
    ///
    /// # Errors
    /// Returns an error if a definition names an unknown collection.
    pub fn new(
        config: &ImageConfig,
        paths: BuilderPaths,
        options: GlobalOptions,
        auths: AuthFile,
        uid: u32,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            entries: expand(config, &options)?,
            paths,
            options,
            auths,
            uid,
            program: "singularity".to_owned(),
        })
    }

    /// Run `program` instead of the `singularity` found on `PATH`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Path of the installed-state document.
    pub fn state_path(&self) -> PathBuf {
        self.paths.install_path.join(STATE_FILE)
    }

    fn build_command(&self, image: &ImageEntry, output: &Path, definition: &Path) -> CommandSpec {
        let mut env = vec![
            (
                "SINGULARITY_CACHEDIR",
                self.paths.source_cache.display().to_string(),
                false,
            ),
            (
                "SINGULARITY_TMPDIR",
                self.paths.tmpdir.display().to_string(),
                false,
            ),
        ];
        if let Some(creds) = image
            .registry
            .as_deref()
            .and_then(|registry| self.auths.for_registry(registry))
        {
            env.push(("SINGULARITY_DOCKER_USERNAME", creds.username.clone(), false));
            env.push(("SINGULARITY_DOCKER_PASSWORD", creds.password.clone(), true));
        }

        let mut cmd = if image.sudo {
            let keep: Vec<&str> = env.iter().map(|(k, _, _)| *k).collect();
            CommandSpec::new("sudo")
                .arg(format!("--preserve-env={}", keep.join(",")))
                .arg(self.program.as_str())
        } else {
            CommandSpec::new(self.program.as_str())
        };
        if image.debug {
            cmd = cmd.arg("-d");
        }
        cmd = cmd.args(["build", "-F"]);
        if image.fakeroot {
            cmd = cmd.arg("--fakeroot");
        }
        cmd = cmd.path_arg(output).path_arg(definition);
        for (key, value, secret) in env {
            cmd = if secret {
                cmd.secret_env(key, value)
            } else {
                cmd.env(key, value)
            };
        }
        cmd
    }
}

impl PlanGenerator for SingularityBuilder {
    type Entry = ImageEntry;

    fn kind(&self) -> &'static str {
        "image"
    }

    fn paths(&self) -> &BuilderPaths {
        &self.paths
    }

    fn update_cleanup(&self) -> bool {
        self.options.update_cleanup
    }

    fn entries(&self) -> &[ImageEntry] {
        &self.entries
    }

    fn target(&self, image: &ImageEntry) -> Result<Target, EngineError> {
        Ok(Target {
            name: image.name.clone(),
            version: image.tag.clone(),
            fingerprint: Fingerprint::of(image)?,
        })
    }

    fn build_rules(
        &self,
        image: &ImageEntry,
        target: &Target,
        layout: &TargetLayout,
    ) -> Result<BuildRules, EngineError> {
        let basename = format!("{}-{}-{}", image.name, image.tag, layout.key);
        let definition = self.paths.build_stage.join(format!("{basename}.def"));
        let staged = self.paths.build_stage.join(format!("{basename}.sif"));
        let installed = layout
            .install_path
            .join(format!("{}-{}.sif", image.name, image.tag));
        let mut rules = Vec::new();

        let content = image.definition();
        let def_path = definition.clone();
        rules.push(Rule::action(
            "write-definition",
            definition.display().to_string(),
            move || {
                buildrules_util::fs::write_atomic(&def_path, content.as_bytes())?;
                Ok(())
            },
        ));

        rules.push(Rule::process(self.build_command(image, &staged, &definition)));

        if image.sudo {
            rules.push(Rule::process(
                CommandSpec::new("sudo")
                    .arg("chown")
                    .arg(format!("{0}:{0}", self.uid))
                    .path_arg(&staged),
            ));
        }

        let dest = installed.clone();
        rules.push(Rule::action(
            "copy-file",
            format!("{} -> {}", staged.display(), installed.display()),
            move || {
                buildrules_util::fs::copy_file(&staged, &dest)?;
                Ok(())
            },
        ));

        debug!(id = %target.identifier(), sudo = image.sudo, "prepared image build");
        Ok(BuildRules {
            rules,
            params: BTreeMap::from([
                ("image".to_owned(), installed.display().to_string()),
                ("flags".to_owned(), image.flags.join(" ")),
            ]),
        })
    }

    fn module_file(
        &self,
        image: &ImageEntry,
        target: &Target,
        install_path: &Path,
        params: &BTreeMap<String, String>,
    ) -> Result<ModuleFile, EngineError> {
        let image_path = params.get("image").cloned().unwrap_or_else(|| {
            install_path
                .join(format!("{}-{}.sif", image.name, image.tag))
                .display()
                .to_string()
        });
        let flags = params
            .get("flags")
            .cloned()
            .unwrap_or_else(|| image.flags.join(" "));
        let help = image
            .help
            .clone()
            .unwrap_or_else(|| format!("Singularity image {} from {}", target.identifier(), image.docker_url()));
        let bin = Path::new(&image_path)
            .parent()
            .unwrap_or(install_path)
            .display()
            .to_string();
        let vars = BTreeMap::from([
            ("help", help.replace("]]", "] ]")),
            ("name", lua_quote(&target.name)),
            ("version", lua_quote(&target.version)),
            ("bin", lua_quote(&bin)),
            ("image", lua_quote(&image_path)),
            ("flags", lua_quote(&flags)),
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
