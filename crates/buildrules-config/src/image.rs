use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::document::{self, check_path_component, ConfigError};

/// The singularity `build_config.toml` targets document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    #[serde(default)]
    pub command_collections: BTreeMap<String, CommandCollection>,
    #[serde(default)]
    pub flag_collections: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub definitions: Vec<DefinitionSpec>,
}

/// A section of a container definition file.
///
/// Variant order is the order sections are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandSection {
    Setup,
    Files,
    Environment,
    Post,
    Runscript,
    Startscript,
    Test,
    Labels,
    Help,
}

impl CommandSection {
    pub const ALL: [CommandSection; 9] = [
        CommandSection::Setup,
        CommandSection::Files,
        CommandSection::Environment,
        CommandSection::Post,
        CommandSection::Runscript,
        CommandSection::Startscript,
        CommandSection::Test,
        CommandSection::Labels,
        CommandSection::Help,
    ];

    /// Section header name, as written after `%` in a definition file.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandSection::Setup => "setup",
            CommandSection::Files => "files",
            CommandSection::Environment => "environment",
            CommandSection::Post => "post",
            CommandSection::Runscript => "runscript",
            CommandSection::Startscript => "startscript",
            CommandSection::Test => "test",
            CommandSection::Labels => "labels",
            CommandSection::Help => "help",
        }
    }
}

/// A named group of definition-file commands, keyed `<section>_commands`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandCollection {
    #[serde(default)]
    pub setup_commands: Vec<String>,
    #[serde(default)]
    pub files_commands: Vec<String>,
    #[serde(default)]
    pub environment_commands: Vec<String>,
    #[serde(default)]
    pub post_commands: Vec<String>,
    #[serde(default)]
    pub runscript_commands: Vec<String>,
    #[serde(default)]
    pub startscript_commands: Vec<String>,
    #[serde(default)]
    pub test_commands: Vec<String>,
    #[serde(default)]
    pub labels_commands: Vec<String>,
    #[serde(default)]
    pub help_commands: Vec<String>,
}

impl CommandCollection {
    pub fn section(&self, section: CommandSection) -> &[String] {
        match section {
            CommandSection::Setup => &self.setup_commands,
            CommandSection::Files => &self.files_commands,
            CommandSection::Environment => &self.environment_commands,
            CommandSection::Post => &self.post_commands,
            CommandSection::Runscript => &self.runscript_commands,
            CommandSection::Startscript => &self.startscript_commands,
            CommandSection::Test => &self.test_commands,
            CommandSection::Labels => &self.labels_commands,
            CommandSection::Help => &self.help_commands,
        }
    }
}

/// One declared image definition. Expands to one target per tag.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionSpec {
    pub name: String,
    pub tags: Vec<String>,
    pub docker_user: Option<String>,
    pub docker_image: Option<String>,
    /// Registry to pull from; selects credentials from the auth document.
    pub registry: Option<String>,
    pub debug: Option<bool>,
    pub sudo: Option<bool>,
    pub fakeroot: Option<bool>,
    #[serde(default)]
    pub command_collections: Vec<String>,
    #[serde(default)]
    pub flag_collections: Vec<String>,
    /// Module help text. Display only.
    pub help: Option<String>,
}

impl DefinitionSpec {
    pub fn docker_user(&self) -> &str {
        self.docker_user.as_deref().unwrap_or("library")
    }

    pub fn docker_image(&self) -> &str {
        self.docker_image.as_deref().unwrap_or(&self.name)
    }
}

/// Concatenate the named command collections, section by section.
///
/// Commands keep the order of `names` and, within a collection, their
/// declared order. Sections with no commands are omitted.
///
/// # Errors
/// Returns `ConfigError::UnknownCollection` for a name missing from `catalog`.
pub fn merge_commands(
    catalog: &BTreeMap<String, CommandCollection>,
    names: &[String],
) -> Result<BTreeMap<CommandSection, Vec<String>>, ConfigError> {
    let mut merged: BTreeMap<CommandSection, Vec<String>> = BTreeMap::new();
    for name in names {
        let collection = catalog.get(name).ok_or_else(|| ConfigError::UnknownCollection {
            kind: "command",
            name: name.clone(),
        })?;
        for section in CommandSection::ALL {
            let commands = collection.section(section);
            if !commands.is_empty() {
                merged.entry(section).or_default().extend_from_slice(commands);
            }
        }
    }
    Ok(merged)
}

/// Concatenate the named flag collections in order.
///
/// # Errors
/// Returns `ConfigError::UnknownCollection` for a name missing from `catalog`.
pub fn merge_flags(
    catalog: &BTreeMap<String, Vec<String>>,
    names: &[String],
) -> Result<Vec<String>, ConfigError> {
    let mut merged = Vec::new();
    for name in names {
        let flags = catalog.get(name).ok_or_else(|| ConfigError::UnknownCollection {
            kind: "flag",
            name: name.clone(),
        })?;
        merged.extend_from_slice(flags);
    }
    Ok(merged)
}

impl ImageConfig {
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

    /// Check names, tags, identifier uniqueness and collection references.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` naming the first offending definition.
    pub fn validate(&self, origin: &Path) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for def in &self.definitions {
            check_path_component(origin, "definition name", &def.name)?;
            if def.tags.is_empty() {
                return Err(ConfigError::invalid(
                    origin,
                    format!("definition {} has no tags", def.name),
                ));
            }
            for tag in &def.tags {
                check_path_component(origin, "tag", tag)?;
                let identifier = format!("{}/{tag}", def.name);
                if !seen.insert(identifier.clone()) {
                    return Err(ConfigError::invalid(
                        origin,
                        format!("image {identifier} is declared more than once"),
                    ));
                }
            }
            merge_commands(&self.command_collections, &def.command_collections)
                .and_then(|_| merge_flags(&self.flag_collections, &def.flag_collections))
                .map_err(|e| ConfigError::invalid(origin, format!("definition {}: {e}", def.name)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(content: &str) -> Result<ImageConfig, ConfigError> {
        let origin = Path::new("build_config.toml");
        let config: ImageConfig = document::parse(content, origin)?;
        config.validate(origin)?;
        Ok(config)
    }

    const SAMPLE: &str = r#"
[command_collections.base]
post_commands = ["apt-get update", "apt-get install -y curl"]
environment_commands = ["export LC_ALL=C"]

[command_collections.python]
post_commands = ["apt-get install -y python3"]
runscript_commands = ["python3 \"$@\""]

[flag_collections]
gpu = ["--nv"]
bind = ["-B", "/scratch"]

[[definitions]]
name = "ubuntu"
tags = ["20.04", "22.04"]
command_collections = ["base", "python"]
flag_collections = ["gpu", "bind"]
"#;

    #[test]
    fn parse_sample() {
        let config = parse(SAMPLE).unwrap_or_else(|e| panic!("{e}"));
        let def = config.definitions.first().unwrap_or_else(|| panic!("no def"));
        assert_eq!(def.tags, ["20.04", "22.04"]);
        assert_eq!(def.docker_user(), "library");
        assert_eq!(def.docker_image(), "ubuntu");
    }

    #[test]
    fn commands_merge_in_declared_order() {
        let config = parse(SAMPLE).unwrap_or_else(|e| panic!("{e}"));
        let names = vec!["base".to_owned(), "python".to_owned()];
        let merged = merge_commands(&config.command_collections, &names)
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            merged.get(&CommandSection::Post).map(Vec::as_slice),
            Some(
                &[
                    "apt-get update".to_owned(),
                    "apt-get install -y curl".to_owned(),
                    "apt-get install -y python3".to_owned(),
                ][..]
            )
        );
        let sections: Vec<_> = merged.keys().copied().collect();
        assert_eq!(
            sections,
            [
                CommandSection::Environment,
                CommandSection::Post,
                CommandSection::Runscript
            ]
        );
    }

    #[test]
    fn flags_merge_in_order() {
        let config = parse(SAMPLE).unwrap_or_else(|e| panic!("{e}"));
        let merged = merge_flags(
            &config.flag_collections,
            &["bind".to_owned(), "gpu".to_owned()],
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(merged, ["-B", "/scratch", "--nv"]);
    }

    #[test]
    fn unknown_collection_is_an_error() {
        let err = merge_flags(&BTreeMap::new(), &["missing".to_owned()])
            .err()
            .unwrap_or_else(|| panic!("expected an error"));
        assert!(
            matches!(err, ConfigError::UnknownCollection { kind: "flag", ref name } if name == "missing"),
            "got {err}"
        );
    }

    #[test]
    fn validation_rejects_unknown_collection_reference() {
        let err = parse("[[definitions]]\nname = \"a\"\ntags = [\"1\"]\ncommand_collections = [\"nope\"]\n")
            .err()
            .unwrap_or_else(|| panic!("expected an error"));
        assert!(err.to_string().contains("nope"), "got {err}");
    }

    #[test]
    fn validation_rejects_empty_tags() {
        assert!(parse("[[definitions]]\nname = \"a\"\ntags = []\n").is_err());
    }

    #[test]
    fn validation_rejects_unknown_section() {
        assert!(parse("[command_collections.x]\nbuild_commands = [\"make\"]\n").is_err());
    }

    #[test]
    fn validation_rejects_duplicate_tag() {
        assert!(parse("[[definitions]]\nname = \"a\"\ntags = [\"1\", \"1\"]\n").is_err());
    }

    proptest! {
        #[test]
        fn merged_flags_are_concatenation(
            first in proptest::collection::vec("[a-z-]{1,8}", 0..5),
            second in proptest::collection::vec("[a-z-]{1,8}", 0..5),
        ) {
            let mut catalog = BTreeMap::new();
            catalog.insert("first".to_owned(), first.clone());
            catalog.insert("second".to_owned(), second.clone());

            let merged = merge_flags(&catalog, &["second".to_owned(), "first".to_owned()]);
            let expected: Vec<String> = second.into_iter().chain(first).collect();
            prop_assert_eq!(merged.ok(), Some(expected));
        }
    }
}
