//! Content digest used as the post-transfer integrity check.
//!
//! MD5 is used purely as a non-cryptographic checksum here, not for any
//! security property.

use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 1024 * 1024;

/// Streams a file from disk and returns its MD5 digest as a lowercase hex string.
pub fn file_md5_hex(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compares a locally computed digest against one reported by the peer.
pub fn verify(expected: &str, actual: &str) -> Result<()> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(Error::DigestMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn md5_matches_known_vector() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"abc").unwrap();
        let digest = file_md5_hex(f.path()).unwrap();
        assert_eq!(digest, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn verify_accepts_case_insensitive_match() {
        assert!(verify("ABCDEF", "abcdef").is_ok());
    }

    #[test]
    fn verify_rejects_mismatch() {
        assert!(verify("abc", "def").is_err());
    }
}
