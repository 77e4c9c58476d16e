use serde::de::DeserializeOwned;
use std::path::Path;

/// Reading a document and checking it against its schema.
///
/// The schema of every document is its serde type (with unknown fields
/// denied) plus the document's own `validate` checks.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid {document}: {message}")]
    Validation { document: String, message: String },
    #[error("{kind} collection `{name}` is not defined")]
    UnknownCollection { kind: &'static str, name: String },
}

impl ConfigError {
    pub(crate) fn invalid(document: &Path, message: impl Into<String>) -> Self {
        Self::Validation {
            document: document.display().to_string(),
            message: message.into(),
        }
    }
}

/// Read and deserialize the TOML document at `path`.
///
/// # Errors
/// Returns an error if the file cannot be read or does not match the schema of `T`.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse(&content, path)
}

/// Like [`load`], but an absent file yields `T::default()`.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Ok(T::default());
    }
    load(path)
}

/// Deserialize TOML `content`, reporting errors against `origin`.
///
/// # Errors
/// Returns `ConfigError::Validation` if the content is not valid TOML or does
/// not match the schema of `T`.
pub fn parse<T: DeserializeOwned>(content: &str, origin: &Path) -> Result<T, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::invalid(origin, e.to_string()))
}

/// Check that a name or version is usable as a single path component.
///
/// Allows only `[a-zA-Z0-9._+-]`, must be non-empty and must not be `.` or `..`.
pub(crate) fn check_path_component(
    document: &Path,
    field: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let safe = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'));
    if safe {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            document,
            format!(
                "{field} \"{value}\" must be non-empty and contain only letters, digits, '.', '-', '_' or '+'"
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_component_rules() {
        let doc = Path::new("build_config.toml");
        assert!(check_path_component(doc, "version", "1.0").is_ok());
        assert!(check_path_component(doc, "version", "3.11+cuda").is_ok());
        assert!(check_path_component(doc, "version", "").is_err());
        assert!(check_path_component(doc, "version", "..").is_err());
        assert!(check_path_component(doc, "name", "a/b").is_err());
        assert!(check_path_component(doc, "name", "a b").is_err());
    }

    #[test]
    fn parse_error_names_document() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Doc {
            name: String,
        }
        let err = parse::<Doc>("name = 3", Path::new("/conf/config.toml"))
            .err()
            .unwrap_or_else(|| panic!("expected an error"));
        assert!(err.to_string().contains("/conf/config.toml"), "got {err}");
    }
}
