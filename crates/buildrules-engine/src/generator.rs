//! The plan-generation skeleton shared by every builder.
//!
//! A builder describes its targets and how to build one; this module decides
//! which targets need building, in which order rules are emitted, and how
//! installed state is recorded.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use buildrules_config::{BuilderPaths, StateRecord, StateStore};
use buildrules_rule::{Plan, Rule};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::fingerprint::{Fingerprint, PathKeys};
use crate::modulefile::ModuleFile;

/// How a target compares with what is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Never installed.
    Fresh,
    /// Installed from a different configuration.
    Stale,
    /// Installed from this exact configuration.
    Unchanged,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::Fresh => "fresh",
            Classification::Stale => "stale",
            Classification::Unchanged => "unchanged",
        };
        f.write_str(label)
    }
}

/// Identity of one configuration entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Module name.
    pub name: String,
    /// Version or tag.
    pub version: String,
    pub fingerprint: Fingerprint,
}

impl Target {
    /// The logical identifier `name/version`.
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// Where one fresh or stale target is staged and installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLayout {
    /// Short fingerprint, or the full one after a collision.
    pub key: String,
    /// Final location of the artifact.
    pub install_path: PathBuf,
}

/// Rules that build one target, plus parameters to record with it.
#[derive(Debug, Default)]
pub struct BuildRules {
    pub rules: Vec<Rule>,
    pub params: BTreeMap<String, String>,
}

/// A builder: turns its configuration entries into rules.
pub trait PlanGenerator {
    /// One validated configuration entry.
    type Entry;

    /// What an entry is called in log messages, e.g. `environment`.
    fn kind(&self) -> &'static str;

    fn paths(&self) -> &BuilderPaths;

    /// Whether a rebuilt target's previous artifact is removed.
    fn update_cleanup(&self) -> bool;

    /// Entries in configuration order.
    fn entries(&self) -> &[Self::Entry];

    /// Apply defaults and compute the entry's identity.
    ///
    /// # Errors
    /// Returns an error if the entry cannot be fingerprinted.
    fn target(&self, entry: &Self::Entry) -> Result<Target, EngineError>;

    /// Install location of a target with path key `key`.
    ///
    /// Defaults to `<install_path>/<name>/<version>/<key>`.
    fn install_path(&self, target: &Target, key: &str) -> PathBuf {
        self.paths()
            .install_path
            .join(&target.name)
            .join(&target.version)
            .join(key)
    }

    /// Checks that must pass before any rule for a fresh or stale target is
    /// emitted.
    ///
    /// # Errors
    /// Returns an error that aborts plan generation.
    fn preflight(&self, _entry: &Self::Entry, _target: &Target) -> Result<(), EngineError> {
        Ok(())
    }

    /// Rules that stage, build and copy the target into `layout.install_path`.
    ///
    /// # Errors
    /// Returns an error if the rules cannot be prepared.
    fn build_rules(
        &self,
        entry: &Self::Entry,
        target: &Target,
        layout: &TargetLayout,
    ) -> Result<BuildRules, EngineError>;

    /// The module file exposing an installed target.
    ///
    /// # Errors
    /// Returns an error if the module template cannot be rendered.
    fn module_file(
        &self,
        entry: &Self::Entry,
        target: &Target,
        install_path: &Path,
        params: &BTreeMap<String, String>,
    ) -> Result<ModuleFile, EngineError>;
}

/// A generated plan and how each target was classified.
#[derive(Debug)]
pub struct PlannedRun {
    pub plan: Plan,
    /// `(identifier, classification)` in configuration order.
    pub targets: Vec<(String, Classification)>,
}

/// Generate the full plan for `generator` against the state in `store`.
///
/// Emits the global preparation rules, then for each entry in order either
/// its build rules or a single log rule, always followed by its module rule.
///
/// # Errors
/// Returns an error if the state document is corrupt or any entry fails its
/// preflight checks. No partial plan is returned.
pub fn generate_plan<G: PlanGenerator>(
    generator: &G,
    store: &StateStore,
) -> Result<PlannedRun, EngineError> {
    let installed = store.load()?;
    let mut keys = PathKeys::seeded(&installed);
    let mut plan = Plan::new();
    let mut targets = Vec::new();

    plan.extend(preparation_rules(generator.paths()));

    for entry in generator.entries() {
        let target = generator.target(entry)?;
        let identifier = target.identifier();
        let previous = installed.get(&identifier);
        let classification = match previous {
            None => Classification::Fresh,
            Some(record) if record.fingerprint != target.fingerprint.as_hex() => {
                Classification::Stale
            }
            Some(_) => Classification::Unchanged,
        };
        debug!(
            id = %identifier,
            fingerprint = target.fingerprint.as_hex(),
            %classification,
            "classified target"
        );

        let (install_path, params) = match (classification, previous) {
            (Classification::Unchanged, Some(record)) => {
                plan.push(Rule::log(format!(
                    "{} {identifier} is up to date ({})",
                    generator.kind(),
                    target.fingerprint.short()
                )));
                (record.install_path.clone(), record.params.clone())
            }
            _ => {
                generator.preflight(entry, &target)?;
                let key = keys.claim(&target.fingerprint);
                let layout = TargetLayout {
                    install_path: generator.install_path(&target, &key),
                    key,
                };
                let verb = if classification == Classification::Fresh {
                    "Installing"
                } else {
                    "Updating"
                };
                plan.push(Rule::log(format!(
                    "{verb} {} {identifier} ({})",
                    generator.kind(),
                    layout.key
                )));

                let built = generator.build_rules(entry, &target, &layout)?;
                plan.extend(built.rules);
                plan.push(record_rule(
                    store,
                    &identifier,
                    StateRecord {
                        fingerprint: target.fingerprint.as_hex().to_owned(),
                        install_path: layout.install_path.clone(),
                        params: built.params.clone(),
                    },
                ));

                if let Some(record) = previous {
                    if generator.update_cleanup() && record.install_path != layout.install_path {
                        plan.push(remove_previous_rule(record.install_path.clone()));
                    }
                }
                (layout.install_path, built.params)
            }
        };

        let module = generator.module_file(entry, &target, &install_path, &params)?;
        plan.push(module.into_rule());
        targets.push((identifier, classification));
    }

    info!(
        rules = plan.len(),
        targets = targets.len(),
        "generated {} plan",
        generator.kind()
    );
    Ok(PlannedRun { plan, targets })
}

fn preparation_rules(paths: &BuilderPaths) -> Vec<Rule> {
    let mut rules = Vec::new();
    for (label, dir) in [
        ("installation", &paths.install_path),
        ("module", &paths.module_path),
        ("source cache", &paths.source_cache),
        ("build stage", &paths.build_stage),
        ("temporary", &paths.tmpdir),
    ] {
        rules.push(Rule::log(format!(
            "Creating {label} directory: {}",
            dir.display()
        )));
        let dir = dir.clone();
        rules.push(Rule::action("makedirs", dir.display().to_string(), move || {
            buildrules_util::fs::ensure_dir(&dir)?;
            Ok(())
        }));
    }

    let module_root = paths.module_path.clone();
    rules.push(Rule::action(
        "clear-modules",
        format!("{}/**/*.lua", module_root.display()),
        move || {
            let removed = buildrules_util::fs::remove_matching(&module_root, "**/*.lua")?;
            debug!(removed, "cleared module files");
            Ok(())
        },
    ));
    rules
}

fn record_rule(store: &StateStore, identifier: &str, record: StateRecord) -> Rule {
    let store = store.clone();
    let identifier = identifier.to_owned();
    let detail = format!("{identifier} in {}", store.path().display());
    Rule::action("record-state", detail, move || {
        store.record(&identifier, record.clone())?;
        Ok(())
    })
}

fn remove_previous_rule(previous: PathBuf) -> Rule {
    Rule::action("remove-previous", previous.display().to_string(), move || {
        buildrules_util::fs::remove_path_if_exists(&previous)?;
        Ok(())
    })
}
