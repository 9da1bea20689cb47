//! Content-addressed cache key helpers (spec.md §3 invariant 7 and
//! §4.4): SHA-256 of the exact script bytes for shell blocks, SHA-256
//! of `<absolute Dockerfile path><contents>` for container blocks.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Full hex digest, truncated to the first 8 characters, used in the
/// shell script cache filename `block_<name>_<hash8>.sh`.
pub fn script_hash8(script: &[u8]) -> String {
    let digest = Sha256::digest(script);
    hex_prefix(&digest, 8)
}

/// The `lacquer-local:<sha256-12>` image tag for a Dockerfile-built
/// image: SHA-256 over the absolute path concatenated with the file's
/// contents, truncated to 12 hex characters.
pub fn dockerfile_tag(dockerfile_path: &Path, contents: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dockerfile_path.to_string_lossy().as_bytes());
    hasher.update(contents);
    let digest = hasher.finalize();
    format!("lacquer-local:{}", hex_prefix(&digest, 12))
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut s = String::with_capacity(chars);
    for byte in digest {
        if s.len() >= chars {
            break;
        }
        s.push_str(&format!("{byte:02x}"));
    }
    s.truncate(chars);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_hash_is_deterministic() {
        let a = script_hash8(b"echo hi");
        let b = script_hash8(b"echo hi");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn different_scripts_hash_differently() {
        assert_ne!(script_hash8(b"echo hi"), script_hash8(b"echo bye"));
    }

    #[test]
    fn dockerfile_tag_has_expected_shape() {
        let tag = dockerfile_tag(Path::new("/workflows/foo/Dockerfile"), b"FROM alpine");
        assert!(tag.starts_with("lacquer-local:"));
        assert_eq!(tag.len(), "lacquer-local:".len() + 12);
    }
}
