use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::document::{self, ConfigError};

/// File name of the settings document inside a configuration folder.
pub const SETTINGS_FILE: &str = "config.toml";

/// File name of the targets document inside a configuration folder.
pub const TARGETS_FILE: &str = "build_config.toml";

/// The `config.toml` settings document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Install root substituted for `$root` in paths.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub paths: PathOverrides,
    #[serde(default)]
    pub options: GlobalOptions,
    /// Deployment declarations, validated per method by the deploy crate.
    #[serde(default)]
    pub deployment: Vec<toml::Table>,
}

/// Optional overrides of a builder's default directory layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathOverrides {
    pub install_path: Option<String>,
    pub module_path: Option<String>,
    pub source_cache: Option<String>,
    pub build_stage: Option<String>,
    pub tmpdir: Option<String>,
}

/// Builder-wide options. Target entries may override the boolean flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalOptions {
    pub debug: Option<bool>,
    pub sudo: Option<bool>,
    pub fakeroot: Option<bool>,
    /// Remove the previous artifact after a target is rebuilt.
    #[serde(default)]
    pub update_cleanup: bool,
    /// Registry credentials document.
    pub auth_file: Option<PathBuf>,
}

impl Settings {
    /// Read `config.toml` from `conf_dir`. A missing file yields defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but does not match the schema.
    pub fn from_dir(conf_dir: &Path) -> Result<Self, ConfigError> {
        document::load_or_default(&conf_dir.join(SETTINGS_FILE))
    }
}

/// Resolve a per-target boolean option.
///
/// The entry's value wins when present, then the builder-wide value, then `false`.
pub fn resolve_flag(entry: Option<bool>, global: Option<bool>) -> bool {
    entry.or(global).unwrap_or(false)
}

/// The directories one builder works in, with `$root` already expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderPaths {
    pub install_path: PathBuf,
    pub module_path: PathBuf,
    pub source_cache: PathBuf,
    pub build_stage: PathBuf,
    pub tmpdir: PathBuf,
}

impl BuilderPaths {
    /// Resolve the layout of builder `tool` under `root`.
    ///
    /// Defaults are `$root/opt/<tool>/{software,modules}` and
    /// `$root/var/<tool>/{cache,stage,tmpdir}`.
    pub fn resolve(tool: &str, root: &Path, overrides: &PathOverrides) -> Self {
        let pick = |value: &Option<String>, default: String| {
            expand_root(value.as_deref().unwrap_or(&default), root)
        };
        Self {
            install_path: pick(&overrides.install_path, format!("$root/opt/{tool}/software")),
            module_path: pick(&overrides.module_path, format!("$root/opt/{tool}/modules")),
            source_cache: pick(&overrides.source_cache, format!("$root/var/{tool}/cache")),
            build_stage: pick(&overrides.build_stage, format!("$root/var/{tool}/stage")),
            tmpdir: pick(&overrides.tmpdir, format!("$root/var/{tool}/tmpdir")),
        }
    }
}

/// Replace a leading `$root` in `raw` with `root`.
pub fn expand_root(raw: &str, root: &Path) -> PathBuf {
    match raw.strip_prefix("$root") {
        Some(rest) => root.join(rest.trim_start_matches('/')),
        None => PathBuf::from(raw),
    }
}
