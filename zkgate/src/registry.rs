//! Consumed payment proof registries.
//!
//! A verified payment proof unlocks exactly one protected call. The registry is
//! the authoritative record of which transaction hashes have been spent and
//! on which resource. [`ProofRegistry::consume`] is an atomic check-and-insert.
//! [`ProofRegistry::release`] hands a proof back when the call it unlocked
//! failed, so the payer can retry with the same transaction.
//!
//! [`FileProofRegistry`] is durable: consumed proofs survive restarts.
//! [`MemoryProofRegistry`] is for tests and single-process development only.

use alloy_primitives::B256;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::timestamp::UnixTimestamp;

/// Result of an attempt to consume a proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumption {
    /// The proof had not been used; it is now consumed.
    Fresh,
    /// The proof was already consumed.
    AlreadyConsumed {
        /// Resource the proof was spent on.
        resource: String,
    },
}

/// The registry could not be read or written.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Underlying storage failed.
    #[error("proof registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored entry is corrupt.
    #[error("proof registry entry on line {line} is corrupt: {source}")]
    Corrupt {
        /// One-based line number.
        line: usize,
        /// Parse failure.
        source: serde_json::Error,
    },
    /// An entry could not be serialized.
    #[error("proof registry serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Authoritative set of consumed payment proofs.
#[async_trait]
pub trait ProofRegistry: Send + Sync {
    /// Atomically marks `tx_hash` as spent on `resource` unless already spent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the registry could not be updated. The proof
    /// must then be treated as unverified.
    async fn consume(&self, tx_hash: B256, resource: &str) -> Result<Consumption, RegistryError>;

    /// Forgets that `tx_hash` was spent. Unknown hashes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the registry could not be updated. The proof
    /// then stays consumed.
    async fn release(&self, tx_hash: B256) -> Result<(), RegistryError>;
}

/// Process-local registry. Forgets everything on restart.
#[derive(Debug, Default)]
pub struct MemoryProofRegistry {
    consumed: DashMap<B256, String>,
}

impl MemoryProofRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProofRegistry for MemoryProofRegistry {
    async fn consume(&self, tx_hash: B256, resource: &str) -> Result<Consumption, RegistryError> {
        match self.consumed.entry(tx_hash) {
            Entry::Occupied(entry) => Ok(Consumption::AlreadyConsumed {
                resource: entry.get().clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(resource.to_owned());
                Ok(Consumption::Fresh)
            }
        }
    }

    async fn release(&self, tx_hash: B256) -> Result<(), RegistryError> {
        self.consumed.remove(&tx_hash);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumedEntry {
    tx_hash: B256,
    resource: String,
    consumed_at: UnixTimestamp,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    released: bool,
}

#[derive(Debug)]
struct FileState {
    consumed: HashMap<B256, String>,
    file: File,
}

/// Append-only JSON-lines registry.
///
/// Each consumed proof is appended and synced to disk before
/// [`ProofRegistry::consume`] reports [`Consumption::Fresh`]. A release is
/// appended as a `"released": true` line; replay applies lines in order.
#[derive(Debug)]
pub struct FileProofRegistry {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileProofRegistry {
    /// Opens (or creates) the registry at `path` and loads its entries.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the file cannot be opened or an entry is corrupt.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let mut consumed = HashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (index, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let entry: ConsumedEntry =
                        serde_json::from_str(line).map_err(|source| RegistryError::Corrupt {
                            line: index + 1,
                            source,
                        })?;
                    if entry.released {
                        consumed.remove(&entry.tx_hash);
                    } else {
                        consumed.entry(entry.tx_hash).or_insert(entry.resource);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        #[cfg(feature = "telemetry")]
        tracing::info!(path = %path.display(), entries = consumed.len(), "opened proof registry");
        Ok(Self {
            path,
            state: Mutex::new(FileState { consumed, file }),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProofRegistry for FileProofRegistry {
    async fn consume(&self, tx_hash: B256, resource: &str) -> Result<Consumption, RegistryError> {
        let mut state = self.state.lock().await;
        if let Some(first) = state.consumed.get(&tx_hash) {
            return Ok(Consumption::AlreadyConsumed {
                resource: first.clone(),
            });
        }
        let entry = ConsumedEntry {
            tx_hash,
            resource: resource.to_owned(),
            consumed_at: UnixTimestamp::now(),
            released: false,
        };
        state.append(&entry).await?;
        state.consumed.insert(tx_hash, entry.resource);
        Ok(Consumption::Fresh)
    }

    async fn release(&self, tx_hash: B256) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        let Some(resource) = state.consumed.get(&tx_hash).cloned() else {
            return Ok(());
        };
        let entry = ConsumedEntry {
            tx_hash,
            resource,
            consumed_at: UnixTimestamp::now(),
            released: true,
        };
        state.append(&entry).await?;
        state.consumed.remove(&tx_hash);
        Ok(())
    }
}

impl FileState {
    async fn append(&mut self, entry: &ConsumedEntry) -> Result<(), RegistryError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.sync_data().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_registry_consumes_once() {
        let registry = MemoryProofRegistry::new();
        let tx = B256::repeat_byte(1);
        assert_eq!(registry.consume(tx, "/a").await.unwrap(), Consumption::Fresh);
        assert_eq!(
            registry.consume(tx, "/b").await.unwrap(),
            Consumption::AlreadyConsumed {
                resource: "/a".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_consumers_race_to_one_winner() {
        let registry = Arc::new(MemoryProofRegistry::new());
        let tx = B256::repeat_byte(2);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.consume(tx, &format!("/r{i}")).await })
            })
            .collect();
        let mut fresh = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == Consumption::Fresh {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn test_file_registry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consumed.jsonl");
        let tx = B256::repeat_byte(3);
        {
            let registry = FileProofRegistry::open(&path).await.unwrap();
            assert_eq!(registry.consume(tx, "/infer").await.unwrap(), Consumption::Fresh);
        }
        let registry = FileProofRegistry::open(&path).await.unwrap();
        assert_eq!(
            registry.consume(tx, "/infer").await.unwrap(),
            Consumption::AlreadyConsumed {
                resource: "/infer".to_owned()
            }
        );
        assert_eq!(
            registry
                .consume(B256::repeat_byte(4), "/infer")
                .await
                .unwrap(),
            Consumption::Fresh
        );
    }

    #[tokio::test]
    async fn test_memory_registry_release_allows_reuse() {
        let registry = MemoryProofRegistry::new();
        let tx = B256::repeat_byte(5);
        registry.release(tx).await.unwrap();
        assert_eq!(registry.consume(tx, "/a").await.unwrap(), Consumption::Fresh);
        registry.release(tx).await.unwrap();
        assert_eq!(registry.consume(tx, "/b").await.unwrap(), Consumption::Fresh);
    }

    #[tokio::test]
    async fn test_file_registry_release_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consumed.jsonl");
        let tx = B256::repeat_byte(6);
        {
            let registry = FileProofRegistry::open(&path).await.unwrap();
            assert_eq!(registry.consume(tx, "/infer").await.unwrap(), Consumption::Fresh);
            registry.release(tx).await.unwrap();
        }
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"released\":true"));

        let registry = FileProofRegistry::open(&path).await.unwrap();
        assert_eq!(registry.consume(tx, "/infer").await.unwrap(), Consumption::Fresh);
    }

    #[tokio::test]
    async fn test_file_registry_rejects_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consumed.jsonl");
        tokio::fs::write(&path, "not json\n").await.unwrap();
        let err = FileProofRegistry::open(&path).await.unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt { line: 1, .. }));
    }
}
