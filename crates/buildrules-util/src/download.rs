//! Installer downloads with SHA-256 verification and atomic placement.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::UtilError;

/// Result of making sure a downloaded file is present in a cache.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Path to the file on disk.
    pub path: PathBuf,
    /// Hex-encoded SHA-256 of the file.
    pub sha256: String,
    /// `true` if the file was downloaded by this call.
    pub downloaded: bool,
}

/// Download `url` into `dest` unless it is already cached, then verify it.
///
/// 1. If `dest` exists, hash it and compare against `expected_sha256` (when
///    given).
/// 2. Otherwise download to a temporary sibling, verify the hash, and rename
///    into place. The temporary file is removed on every error path.
///
/// # Errors
/// Returns an error if the download fails, the hash does not match, or an
/// I/O operation fails.
pub fn fetch_verified(
    url: &str,
    dest: &Path,
    expected_sha256: Option<&str>,
) -> Result<FetchResult, UtilError> {
    if dest.exists() {
        let sha256 = match expected_sha256 {
            Some(expected) => crate::hash::verify_file(dest, expected)?,
            None => crate::hash::sha256_file(dest)?,
        };
        return Ok(FetchResult {
            path: dest.to_path_buf(),
            sha256,
            downloaded: false,
        });
    }

    if let Some(parent) = dest.parent() {
        crate::fs::ensure_dir(parent)?;
    }

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dest.with_file_name(format!(".tmp-{}-{name}", std::process::id()));

    let sha256 = match download(url, &tmp_path) {
        Ok(hash) => hash,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
    };

    if let Some(expected) = expected_sha256 {
        if !sha256.eq_ignore_ascii_case(expected) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(UtilError::ChecksumMismatch {
                path: dest.display().to_string(),
                expected: expected.to_owned(),
                actual: sha256,
            });
        }
    }

    std::fs::rename(&tmp_path, dest).map_err(|source| {
        let _ = std::fs::remove_file(&tmp_path);
        UtilError::Io {
            path: dest.display().to_string(),
            source,
        }
    })?;

    Ok(FetchResult {
        path: dest.to_path_buf(),
        sha256,
        downloaded: true,
    })
}

/// Stream `url` into `dest`, returning the SHA-256 of the downloaded bytes.
///
/// # Errors
/// Returns an error if the HTTP request fails, the file cannot be written,
/// or a read error occurs during streaming.
pub fn download(url: &str, dest: &Path) -> Result<String, UtilError> {
    let agent = ureq::Agent::new_with_config(
        ureq::config::Config::builder()
            .timeout_connect(Some(std::time::Duration::from_secs(30)))
            .timeout_global(Some(std::time::Duration::from_secs(1800)))
            .build(),
    );

    let download_error = |message: String| UtilError::Download {
        url: url.to_owned(),
        message,
    };

    let response = agent
        .get(url)
        .call()
        .map_err(|e| download_error(e.to_string()))?;

    let content_length: Option<u64> = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());

    let mut body = response.into_body();
    let mut reader = body.as_reader();
    let mut file = std::fs::File::create(dest).map_err(|source| UtilError::Io {
        path: dest.display().to_string(),
        source,
    })?;

    info!(url, "downloading");

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut last_pct: u64 = 0;
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = std::io::Read::read(&mut reader, &mut buf)
            .map_err(|e| download_error(e.to_string()))?;
        if n == 0 {
            break;
        }
        let Some(chunk) = buf.get(..n) else {
            break;
        };
        std::io::Write::write_all(&mut file, chunk).map_err(|source| UtilError::Io {
            path: dest.display().to_string(),
            source,
        })?;
        hasher.update(chunk);

        downloaded = downloaded.saturating_add(n as u64);
        if let Some(total) = content_length.filter(|t| *t > 0) {
            let pct = downloaded.saturating_mul(100) / total;
            if pct != last_pct && pct % 10 == 0 {
                info!(url, percent = pct, "download progress");
                last_pct = pct;
            }
        }
    }

    info!(url, bytes = downloaded, "download finished");
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn cached_file_is_verified_without_download() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("Miniconda3-latest-Linux-x86_64.sh");
        fs::write(&dest, b"installer").unwrap();
        let expected = crate::hash::sha256_bytes(b"installer");

        let result = fetch_verified("http://invalid.invalid/x.sh", &dest, Some(&expected)).unwrap();
        assert!(!result.downloaded);
        assert_eq!(result.sha256, expected);
    }

    #[test]
    fn cached_file_with_wrong_checksum_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("installer.sh");
        fs::write(&dest, b"corrupt").unwrap();

        let err = fetch_verified("http://invalid.invalid/x.sh", &dest, Some("00ff")).unwrap_err();
        assert!(matches!(err, UtilError::ChecksumMismatch { .. }), "got {err}");
    }

    #[test]
    fn failed_download_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("cache").join("installer.sh");

        let err = fetch_verified("http://127.0.0.1:9/installer.sh", &dest, None).unwrap_err();
        assert!(matches!(err, UtilError::Download { .. }), "got {err}");
        assert!(!dest.exists());
        let leftovers: Vec<_> = fs::read_dir(dest.parent().unwrap()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
