//! Hashing utilities for deterministic fingerprints and checksum verification.

use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::UtilError;

/// Compute the SHA-256 hex digest of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hex digest of a file using streaming reads.
///
/// Uses a 64 KiB buffer so multi-gigabyte installers and images are never
/// loaded into memory at once.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> Result<String, UtilError> {
    let file = std::fs::File::open(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = std::io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = std::io::Read::read(&mut reader, &mut buf).map_err(|source| UtilError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if n == 0 {
            break;
        }
        let Some(chunk) = buf.get(..n) else {
            break; // unreachable: n is bounded by buf.len()
        };
        hasher.update(chunk);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Return a copy of `value` with every object's keys in sorted order.
///
/// `serde_json` keeps insertion order when its `preserve_order` feature is
/// enabled anywhere in the dependency graph, so the sort is done explicitly.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(inner));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Compute the SHA-256 of the canonical JSON encoding of `value`.
pub fn sha256_value(value: &Value) -> String {
    let canonical = canonicalize(value);
    sha256_bytes(canonical.to_string().as_bytes())
}

/// Serialize `value` and compute the SHA-256 of its canonical JSON encoding.
///
/// # Errors
/// Returns an error if `value` cannot be represented as JSON (e.g. a map with
/// non-string keys).
pub fn sha256_serialize<T: Serialize>(value: &T) -> Result<String, UtilError> {
    let json = serde_json::to_value(value).map_err(|e| UtilError::Serialize {
        message: e.to_string(),
    })?;
    Ok(sha256_value(&json))
}

/// Verify that the file at `path` has the SHA-256 `expected`.
///
/// Returns the computed hash on success.
///
/// # Errors
/// Returns `UtilError::ChecksumMismatch` if the hashes differ, or an I/O
/// error if the file cannot be read.
pub fn verify_file(path: &Path, expected: &str) -> Result<String, UtilError> {
    let actual = sha256_file(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(UtilError::ChecksumMismatch {
            path: path.display().to_string(),
            expected: expected.to_owned(),
            actual,
        });
    }
    Ok(actual)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn sha256_bytes_empty() {
        assert_eq!(
            sha256_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("installer.sh");
        fs::write(&file, b"#!/bin/sh\necho hi\n").unwrap();

        assert_eq!(
            sha256_file(&file).unwrap(),
            sha256_bytes(b"#!/bin/sh\necho hi\n")
        );
    }

    #[test]
    fn sha256_file_missing() {
        assert!(sha256_file(Path::new("/nonexistent/installer.sh")).is_err());
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"name": "tools", "version": "1.0", "opts": {"x": 1, "y": [1, 2]}});
        let b = json!({"opts": {"y": [1, 2], "x": 1}, "version": "1.0", "name": "tools"});
        assert_eq!(sha256_value(&a), sha256_value(&b));
    }

    #[test]
    fn array_order_matters() {
        let a = json!({"packages": ["numpy", "scipy"]});
        let b = json!({"packages": ["scipy", "numpy"]});
        assert_ne!(sha256_value(&a), sha256_value(&b));
    }

    #[test]
    fn canonicalize_sorts_nested_keys() {
        let value = json!({"b": {"d": 1, "c": 2}, "a": 0});
        assert_eq!(canonicalize(&value).to_string(), r#"{"a":0,"b":{"c":2,"d":1}}"#);
    }

    #[test]
    fn sha256_serialize_matches_value() {
        #[derive(Serialize)]
        struct Entry {
            name: &'static str,
            version: &'static str,
        }
        let hashed = sha256_serialize(&Entry {
            name: "tools",
            version: "1.0",
        })
        .unwrap();
        assert_eq!(hashed, sha256_value(&json!({"version": "1.0", "name": "tools"})));
    }

    #[test]
    fn verify_file_accepts_matching_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        fs::write(&file, b"payload").unwrap();
        let expected = sha256_bytes(b"payload").to_uppercase();

        assert!(verify_file(&file, &expected).is_ok());
    }

    #[test]
    fn verify_file_rejects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        fs::write(&file, b"payload").unwrap();

        let err = verify_file(&file, "deadbeef").unwrap_err();
        assert!(matches!(err, UtilError::ChecksumMismatch { .. }), "got {err}");
    }

    proptest! {
        #[test]
        fn fingerprint_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,8}", "\\PC{0,16}", 0..12),
        ) {
            let mut forward = Map::new();
            for (k, v) in &entries {
                forward.insert(k.clone(), Value::String(v.clone()));
            }
            let mut reverse = Map::new();
            for (k, v) in entries.iter().rev() {
                reverse.insert(k.clone(), Value::String(v.clone()));
            }
            prop_assert_eq!(
                sha256_value(&Value::Object(forward)),
                sha256_value(&Value::Object(reverse))
            );
        }
    }
}
