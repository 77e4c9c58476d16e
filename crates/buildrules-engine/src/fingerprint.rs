//! Content fingerprints of fully-defaulted target configurations.

use std::collections::BTreeMap;
use std::fmt;

use buildrules_config::StateMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Length of the fingerprint prefix used in filesystem paths.
pub const SHORT_LEN: usize = 8;

/// A SHA-256 fingerprint in lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint any serializable configuration value.
    ///
    /// Object keys are sorted before hashing, so field and map ordering never
    /// change the result.
    ///
    /// # Errors
    /// Returns an error if `value` cannot be encoded as JSON.
    pub fn of<T: Serialize>(value: &T) -> Result<Self, EngineError> {
        let hex = buildrules_util::hash::sha256_serialize(value)?;
        Ok(Self(hex))
    }

    /// Wrap a previously computed hex digest, e.g. one read from a state record.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// The first eight hex characters.
    pub fn short(&self) -> &str {
        self.0.get(..SHORT_LEN).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracks which short fingerprints already name an on-disk path.
///
/// A short prefix belongs to the first full fingerprint that claims it.
/// Any other fingerprint with the same prefix gets its full form instead,
/// so two different configurations never share a directory.
#[derive(Debug, Default)]
pub struct PathKeys {
    claimed: BTreeMap<String, String>,
}

impl PathKeys {
    /// Seed with the artifacts already recorded in `state`.
    ///
    /// Only records whose install path actually ends in their short
    /// fingerprint hold a claim on it.
    pub fn seeded(state: &StateMap) -> Self {
        let mut keys = Self::default();
        for record in state.values() {
            let fingerprint = Fingerprint::from_hex(record.fingerprint.as_str());
            let short = fingerprint.short();
            let owns_short = record
                .install_path
                .file_name()
                .is_some_and(|name| name == short);
            if owns_short {
                keys.claimed
                    .entry(short.to_owned())
                    .or_insert_with(|| record.fingerprint.clone());
            }
        }
        keys
    }

    /// Return the path key for `fingerprint`: its short form, or the full
    /// fingerprint when the short form already belongs to another one.
    pub fn claim(&mut self, fingerprint: &Fingerprint) -> String {
        let short = fingerprint.short();
        match self.claimed.get(short) {
            Some(owner) if owner != fingerprint.as_hex() => {
                warn!(
                    short,
                    fingerprint = fingerprint.as_hex(),
                    "short fingerprint already in use, using the full fingerprint"
                );
                fingerprint.as_hex().to_owned()
            }
            Some(_) => short.to_owned(),
            None => {
                debug!(short, "claiming short fingerprint");
                self.claimed
                    .insert(short.to_owned(), fingerprint.as_hex().to_owned());
                short.to_owned()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use buildrules_config::StateRecord;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn short_is_prefix() {
        let fp = Fingerprint::of(&json!({"name": "tools", "version": "1.0"})).unwrap();
        assert_eq!(fp.as_hex().len(), 64);
        assert_eq!(fp.short().len(), SHORT_LEN);
        assert!(fp.as_hex().starts_with(fp.short()));
    }

    #[test]
    fn nested_key_order_is_irrelevant() {
        let a = json!({"name": "tools", "opts": {"b": 1, "a": [1, 2]}});
        let b = json!({"opts": {"a": [1, 2], "b": 1}, "name": "tools"});
        assert_eq!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    #[test]
    fn list_order_matters() {
        let a = json!({"packages": ["numpy", "scipy"]});
        let b = json!({"packages": ["scipy", "numpy"]});
        assert_ne!(Fingerprint::of(&a).unwrap(), Fingerprint::of(&b).unwrap());
    }

    fn fp(prefix: &str, fill: char) -> Fingerprint {
        let mut hex = prefix.to_owned();
        while hex.len() < 64 {
            hex.push(fill);
        }
        Fingerprint::from_hex(hex)
    }

    #[test]
    fn colliding_prefix_falls_back_to_full() {
        let mut keys = PathKeys::default();
        let first = fp("0123abcd", '1');
        let second = fp("0123abcd", '2');

        assert_eq!(keys.claim(&first), "0123abcd");
        assert_eq!(keys.claim(&second), second.as_hex());
        // The owner keeps its short key on later claims.
        assert_eq!(keys.claim(&first), "0123abcd");
    }

    #[test]
    fn recorded_artifact_holds_its_prefix() {
        let owner = fp("deadbeef", '1');
        let state = StateMap::from([(
            "tools/1.0".to_owned(),
            StateRecord {
                fingerprint: owner.as_hex().to_owned(),
                install_path: PathBuf::from("/opt/tools/1.0/deadbeef"),
                params: BTreeMap::new(),
            },
        )]);
        let mut keys = PathKeys::seeded(&state);

        let newcomer = fp("deadbeef", '9');
        assert_eq!(keys.claim(&newcomer), newcomer.as_hex());
        assert_eq!(keys.claim(&owner), "deadbeef");
    }

    #[test]
    fn record_with_full_key_holds_no_claim() {
        let full = fp("cafebabe", '3');
        let state = StateMap::from([(
            "tools/2.0".to_owned(),
            StateRecord {
                fingerprint: full.as_hex().to_owned(),
                install_path: PathBuf::from(format!("/opt/tools/2.0/{}", full.as_hex())),
                params: BTreeMap::new(),
            },
        )]);
        let mut keys = PathKeys::seeded(&state);
        let other = fp("cafebabe", '4');
        assert_eq!(keys.claim(&other), "cafebabe");
    }

    proptest! {
        #[test]
        fn fingerprint_ignores_map_insertion_order(
            entries in proptest::collection::btree_map("[a-z_]{1,10}", "[a-z0-9.]{0,10}", 1..10),
        ) {
            let forward: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let reverse: serde_json::Map<String, serde_json::Value> = entries
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            let a = Fingerprint::of(&forward).unwrap();
            let b = Fingerprint::of(&reverse).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
