use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Installed-state records keyed by logical identifier (`name/version`).
pub type StateMap = BTreeMap<String, StateRecord>;

/// What was last installed successfully for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Full fingerprint of the configuration that was built.
    pub fingerprint: String,
    /// Where the artifact was installed.
    pub install_path: PathBuf,
    /// Builder-specific parameters needed to regenerate the module file.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    targets: StateMap,
}

/// The installed-state document of one builder.
///
/// The document is read whole and rewritten whole. There is no locking:
/// only one build process may use an install root at a time.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. Returns an empty map if the document does not exist.
    ///
    /// # Errors
    /// Returns `StateError::Corrupt` if the document cannot be parsed.
    pub fn load(&self) -> Result<StateMap, StateError> {
        if !self.path.exists() {
            return Ok(StateMap::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| StateError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        let document: StateDocument =
            toml::from_str(&content).map_err(|source| StateError::Corrupt {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(document.targets)
    }

    /// Look up the record for `identifier`.
    ///
    /// # Errors
    /// Returns an error if the document cannot be read or parsed.
    pub fn get(&self, identifier: &str) -> Result<Option<StateRecord>, StateError> {
        Ok(self.load()?.remove(identifier))
    }

    /// Set the record for `identifier`, keeping every other record.
    ///
    /// Reads the current document at call time, so records written earlier in
    /// the same run are preserved.
    ///
    /// # Errors
    /// Returns an error if the document cannot be read, parsed or written.
    pub fn record(&self, identifier: &str, record: StateRecord) -> Result<(), StateError> {
        let mut targets = self.load()?;
        targets.insert(identifier.to_owned(), record);
        self.save(targets)
    }

    /// Atomically replace the document with `targets`.
    fn save(&self, targets: StateMap) -> Result<(), StateError> {
        let content = toml::to_string_pretty(&StateDocument { targets })
            .map_err(|source| StateError::Serialize { source })?;
        buildrules_util::fs::write_atomic(&self.path, content.as_bytes())?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("installed-state document {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        source: toml::de::Error,
    },
    #[error("cannot serialize installed state: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("{0}")]
    Write(#[from] buildrules_util::error::UtilError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(fingerprint: &str, path: &str) -> StateRecord {
        StateRecord {
            fingerprint: fingerprint.to_owned(),
            install_path: PathBuf::from(path),
            params: BTreeMap::new(),
        }
    }

    #[test]
    fn empty_when_absent() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = StateStore::new(dir.path().join("installed_environments.toml"));
        assert!(store.load().unwrap_or_else(|e| panic!("{e}")).is_empty());
        assert!(store
            .get("tools/1.0")
            .unwrap_or_else(|e| panic!("{e}"))
            .is_none());
    }

    #[test]
    fn record_then_get() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = StateStore::new(dir.path().join("installed_environments.toml"));
        let mut rec = record("abc", "/opt/tools/1.0/abc");
        rec.params.insert("flags".to_owned(), "--nv".to_owned());
        store.record("tools/1.0", rec.clone()).unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            store.get("tools/1.0").unwrap_or_else(|e| panic!("{e}")),
            Some(rec)
        );
    }

    #[test]
    fn record_keeps_other_targets_and_overwrites_same() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = StateStore::new(dir.path().join("state.toml"));
        store
            .record("a/1", record("one", "/a"))
            .unwrap_or_else(|e| panic!("{e}"));
        store
            .record("b/1", record("two", "/b"))
            .unwrap_or_else(|e| panic!("{e}"));
        store
            .record("a/1", record("three", "/a2"))
            .unwrap_or_else(|e| panic!("{e}"));

        let map = store.load().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a/1").map(|r| r.fingerprint.as_str()), Some("three"));
        assert_eq!(map.get("b/1").map(|r| r.fingerprint.as_str()), Some("two"));
    }

    #[test]
    fn no_temp_file_remains() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("state.toml");
        let store = StateStore::new(&path);
        store
            .record("a/1", record("one", "/a"))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(path.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap_or_else(|e| panic!("{e}"))
            .filter_map(Result::ok)
            .map(|e| e.file_name())
            .filter(|name| name != "state.toml")
            .collect();
        assert!(leftovers.is_empty(), "left behind {leftovers:?}");
    }

    #[test]
    fn unwritable_location_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let blocker = dir.path().join("software");
        fs::write(&blocker, b"not a directory").unwrap_or_else(|e| panic!("{e}"));
        let store = StateStore::new(blocker.join("state.toml"));
        let Err(err) = store.record("a/1", record("one", "/a")) else {
            panic!("recorded state under a regular file");
        };
        assert!(matches!(err, StateError::Write(_)), "got {err}");
    }

    #[test]
    fn creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let store = StateStore::new(dir.path().join("software").join("state.toml"));
        store
            .record("a/1", record("one", "/a"))
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(store.path().exists());
    }

    #[test]
    fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("state.toml");
        fs::write(&path, "[targets.\"a/1\"\nfingerprint = ").unwrap_or_else(|e| panic!("{e}"));

        let err = StateStore::new(&path)
            .load()
            .err()
            .unwrap_or_else(|| panic!("expected an error"));
        assert!(matches!(err, StateError::Corrupt { .. }), "got {err}");
    }

    #[test]
    fn document_layout() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("state.toml");
        StateStore::new(&path)
            .record("tools/1.0", record("abc", "/opt/tools"))
            .unwrap_or_else(|e| panic!("{e}"));

        let content = fs::read_to_string(&path).unwrap_or_else(|e| panic!("{e}"));
        assert!(content.contains("[targets.\"tools/1.0\"]"), "content was: {content}");
        assert!(!content.contains("params"), "content was: {content}");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn store_round_trip(
                records in proptest::collection::btree_map(
                    "[a-z]{1,8}/[0-9]{1,3}\\.[0-9]{1,3}",
                    ("[a-f0-9]{64}", "/[a-z]{1,10}(/[a-z0-9.]{1,10}){0,3}"),
                    1..8,
                ),
            ) {
                let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
                let store = StateStore::new(dir.path().join("state.toml"));
                for (id, (fp, path)) in &records {
                    store.record(id, record(fp, path)).unwrap_or_else(|e| panic!("{e}"));
                }
                let loaded = store.load().unwrap_or_else(|e| panic!("{e}"));
                prop_assert_eq!(loaded.len(), records.len());
                for (id, (fp, path)) in &records {
                    prop_assert_eq!(loaded.get(id), Some(&record(fp, path)));
                }
            }
        }
    }
}
