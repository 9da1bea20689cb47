//! The block registry (spec.md §4.4): maps runtime kind to executor,
//! loads and validates `block.laq.yaml` files, and caches parsed blocks
//! in memory keyed by absolute path plus modification time — a stat
//! mismatch invalidates the entry.

use lacquer_core::block::{self, Block};
use lacquer_core::error::{LacquerError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    block: Block,
    modified: SystemTime,
}

/// In-memory cache of loaded blocks. Safe to share across concurrent
/// step executions via `Arc<BlockRegistry>`.
#[derive(Default)]
pub struct BlockRegistry {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `<dir>/block.laq.yaml`, returning the cached copy if the
    /// file's modification time hasn't changed since it was last read.
    pub async fn load(&self, dir: &Path) -> Result<Block> {
        let path = dir.join("block.laq.yaml").canonicalize().map_err(|e| {
            LacquerError::BlockRegistryError {
                message: format!("cannot resolve block path {}: {e}", dir.display()),
            }
        })?;

        let modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| LacquerError::BlockRegistryError {
                message: format!("cannot stat {}: {e}", path.display()),
            })?;

        if let Some(entry) = self.entries.read().await.get(&path) {
            if entry.modified == modified {
                debug!(path = %path.display(), "block cache hit");
                return Ok(entry.block.clone());
            }
            debug!(path = %path.display(), "block cache entry stale, reparsing");
        }

        let parsed = block::parse_file(&path).map_err(|e| LacquerError::BlockRegistryError {
            message: format!("failed to load block {}: {e}", path.display()),
        })?;

        self.entries.write().await.insert(
            path,
            CacheEntry {
                block: parsed.clone(),
                modified,
            },
        );

        Ok(parsed)
    }

    /// Drops every cached entry. Useful for tests and long-lived hosts
    /// that want to force a full reload.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_block(dir: &Path, contents: &str) {
        let mut file = std::fs::File::create(dir.join("block.laq.yaml")).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    const BLOCK_YAML: &str = r#"
name: greet
runtime: bash
inputs:
  name:
    type: string
    required: true
outputs:
  greeting:
    type: string
script: |
  echo "{\"greeting\": \"hi\"}"
"#;

    #[tokio::test]
    async fn loads_and_caches_block() {
        let dir = tempfile::tempdir().unwrap();
        write_block(dir.path(), BLOCK_YAML);

        let registry = BlockRegistry::new();
        let first = registry.load(dir.path()).await.unwrap();
        assert_eq!(first.name, "greet");

        // second load should hit the cache (same mtime) without re-parsing;
        // behaviorally indistinguishable here, but exercises the path.
        let second = registry.load(dir.path()).await.unwrap();
        assert_eq!(second.name, "greet");
    }

    #[tokio::test]
    async fn stat_mismatch_invalidates_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        write_block(dir.path(), BLOCK_YAML);

        let registry = BlockRegistry::new();
        registry.load(dir.path()).await.unwrap();

        // rewrite with a later mtime and a different declared name
        std::thread::sleep(std::time::Duration::from_millis(10));
        write_block(
            dir.path(),
            &BLOCK_YAML.replace("name: greet", "name: greet-v2"),
        );

        let reloaded = registry.load(dir.path()).await.unwrap();
        assert_eq!(reloaded.name, "greet-v2");
    }

    #[tokio::test]
    async fn missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BlockRegistry::new();
        let err = registry.load(dir.path()).await.unwrap_err();
        assert!(matches!(err, LacquerError::BlockRegistryError { .. }));
    }
}
