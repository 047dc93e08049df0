//! Hash and size verification invoked from `cache_payload` (`spec.md`
//! 4.7), bounded by the "up to 2 verify-tryagain attempts" rule.

use std::path::Path;

use sha2::{Digest, Sha512};

use crate::error::{EngineError, Result};

/// What `cache_payload` checks a downloaded/located file against
/// before it is considered verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedPayload {
    /// Declared size in bytes from the manifest.
    pub size: u64,
    /// Declared SHA-512 digest from the manifest, lowercase hex.
    pub sha512_hex: Option<String>,
}

/// Why verification rejected a file, used by the cache-phase retry
/// loop to decide whether to re-verify or re-acquire from scratch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyFailure {
    /// The file's size did not match the manifest.
    SizeMismatch,
    /// The file's hash did not match the manifest.
    HashMismatch,
}

/// Verifies `path` against `expected`'s declared size and (if present)
/// hash.
///
/// # Errors
/// Returns [`EngineError::Io`] if the file cannot be read, or
/// [`EngineError::CorruptFormat`] carrying a [`VerifyFailure`] detail
/// when size or hash verification fails.
pub fn verify_payload(path: &Path, expected: &ExpectedPayload) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|source| EngineError::Io {
        action: format!("statting payload {}", path.display()),
        source,
    })?;
    if metadata.len() != expected.size {
        return Err(verify_error(path, VerifyFailure::SizeMismatch));
    }
    if let Some(expected_hex) = &expected.sha512_hex {
        let actual_hex = sha512_hex(path)?;
        if &actual_hex != expected_hex {
            return Err(verify_error(path, VerifyFailure::HashMismatch));
        }
    }
    Ok(())
}

/// Computes the lowercase-hex SHA-512 digest of `path`'s contents.
///
/// # Errors
/// Returns [`EngineError::Io`] if the file cannot be read.
pub fn sha512_hex(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|source| EngineError::Io {
        action: format!("opening payload {} for hashing", path.display()),
        source,
    })?;
    let mut hasher = Sha512::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| EngineError::Io {
        action: format!("hashing payload {}", path.display()),
        source,
    })?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn verify_error(path: &Path, failure: VerifyFailure) -> EngineError {
    let what = match failure {
        VerifyFailure::SizeMismatch => "payload size does not match the manifest",
        VerifyFailure::HashMismatch => "payload hash does not match the manifest",
    };
    EngineError::CorruptFormat {
        what: what.to_string(),
        path: Some(path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_size_and_hash_when_both_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"hello world").unwrap();
        let hash = sha512_hex(&path).unwrap();
        let expected = ExpectedPayload { size: 11, sha512_hex: Some(hash) };
        verify_payload(&path, &expected).unwrap();
    }

    #[test]
    fn size_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"short").unwrap();
        let expected = ExpectedPayload { size: 999, sha512_hex: None };
        let err = verify_payload(&path, &expected).unwrap_err();
        assert!(matches!(err, EngineError::CorruptFormat { .. }));
    }

    #[test]
    fn hash_mismatch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"hello world").unwrap();
        let expected = ExpectedPayload { size: 11, sha512_hex: Some("0".repeat(128)) };
        let err = verify_payload(&path, &expected).unwrap_err();
        assert!(matches!(err, EngineError::CorruptFormat { .. }));
    }
}
