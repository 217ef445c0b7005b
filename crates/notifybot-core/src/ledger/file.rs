// # File Ref Store
//
// File-based implementation of RefStore with crash recovery.
//
// ## Purpose
//
// Keeps ledger references in a local JSON file so a single host can run the
// bot without a history remote. The compare-and-swap rule is enforced
// against the file content: every write re-reads the file under a lock and
// is rejected when the reference moved.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "generation": 2,
//   "refs": {
//     "history": {
//       "head": "0000000000000000000000000000000000000002",
//       "files": {
//         "tags.txt": "mail:jdk-17+35 done\n",
//         "branches.txt": "mail:master 1f2e3d...\n"
//       }
//     }
//   }
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::HistoryStoreConfig;
use crate::traits::{RefStore, RefStoreFactory, StoredFile, WriteOutcome, WriteRequest};
use crate::types::Hash;
use crate::Error;

/// State file format version
/// Used for future migration if format changes
const STATE_FILE_VERSION: &str = "1.0";

/// Serializable state file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RefFileFormat {
    version: String,
    generation: u64,
    refs: BTreeMap<String, StoredRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRef {
    head: Hash,
    files: BTreeMap<String, String>,
}

/// File-based ref store with crash recovery
///
/// Only processes on the same host should share a file; the lock guarding
/// read-check-write is held per instance, and the rename is the only
/// cross-process guarantee.
#[derive(Debug)]
pub struct FileRefStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRefStore {
    /// Create or load a file ref store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing file, falling back to the backup when corrupted
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create history directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let state = Self::load_with_recovery(&path).await?;
        tracing::debug!(
            "Opened history file {} with {} references",
            path.display(),
            state.refs.len()
        );

        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Load the file, recovering from the backup when it is corrupted
    async fn load_with_recovery(path: &Path) -> Result<RefFileFormat, Error> {
        match Self::load(path).await {
            Ok(state) => Ok(state),
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "History file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    return Err(Error::ledger(format!(
                        "History file {} is corrupted and no backup exists",
                        path.display()
                    )));
                }

                let state = Self::load(&backup_path).await.map_err(|backup_err| {
                    Error::ledger(format!(
                        "History file {} and its backup are corrupted: {}",
                        path.display(),
                        backup_err
                    ))
                })?;
                fs::copy(&backup_path, path).await?;
                tracing::info!("Restored history file from backup");
                Ok(state)
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<RefFileFormat, Error> {
        if !path.exists() {
            return Ok(RefFileFormat {
                version: STATE_FILE_VERSION.to_string(),
                ..RefFileFormat::default()
            });
        }

        let content = fs::read_to_string(path).await?;
        let state: RefFileFormat = serde_json::from_str(&content)?;

        if state.version != STATE_FILE_VERSION {
            tracing::warn!(
                "History file version mismatch: expected {}, got {}. \
                Attempting to load anyway.",
                STATE_FILE_VERSION,
                state.version
            );
        }

        Ok(state)
    }

    /// Write the file atomically, keeping the previous version as backup
    async fn store(&self, state: &RefFileFormat) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(state)?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::ledger(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("History written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl RefStore for FileRefStore {
    async fn read(&self, reference: &str, file: &str) -> Result<Option<StoredFile>, Error> {
        let _guard = self.lock.lock().await;
        let state = Self::load_with_recovery(&self.path).await?;
        Ok(state.refs.get(reference).map(|stored| StoredFile {
            head: stored.head.clone(),
            content: stored.files.get(file).cloned().unwrap_or_default(),
        }))
    }

    async fn write(&self, request: WriteRequest<'_>) -> Result<WriteOutcome, Error> {
        let _guard = self.lock.lock().await;
        let mut state = Self::load_with_recovery(&self.path).await?;

        let current = state.refs.get(request.reference);
        if current.map(|stored| &stored.head) != request.parent {
            return Ok(WriteOutcome::Rejected {
                details: format!("{} moved since it was read", request.reference),
            });
        }

        let mut files = current.map(|stored| stored.files.clone()).unwrap_or_default();
        files.insert(request.file.to_string(), request.content.to_string());

        state.generation += 1;
        state.version = STATE_FILE_VERSION.to_string();
        let head = Hash::new(format!("{:040x}", state.generation));
        state.refs.insert(
            request.reference.to_string(),
            StoredRef {
                head: head.clone(),
                files,
            },
        );

        self.store(&state).await?;
        tracing::debug!(
            "{} advanced to {} by {} ({})",
            request.reference,
            head.abbreviate(),
            request.identity.name,
            request.message
        );
        Ok(WriteOutcome::Pushed(head))
    }
}

/// Factory for file-backed ref stores
///
/// Opening the file is asynchronous, so the factory only checks the path and
/// defers loading to the first read.
#[derive(Debug, Default)]
pub struct FileRefStoreFactory;

impl RefStoreFactory for FileRefStoreFactory {
    fn create(&self, config: &HistoryStoreConfig) -> Result<Arc<dyn RefStore>, Error> {
        match config {
            HistoryStoreConfig::File { path } => {
                if path.is_empty() {
                    return Err(Error::config("History file path cannot be empty"));
                }
                Ok(Arc::new(FileRefStore {
                    path: PathBuf::from(path),
                    lock: Mutex::new(()),
                }))
            }
            other => Err(Error::config(format!(
                "File store factory cannot handle {} configuration",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, LedgerLocation};
    use tempfile::tempdir;

    async fn ledger(store: Arc<dyn RefStore>, file: &str) -> Ledger {
        Ledger::open(store, LedgerLocation::new("history", file), 3)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");

        let store: Arc<dyn RefStore> = Arc::new(FileRefStore::new(&path).await.unwrap());
        let tags = ledger(store.clone(), "tags.txt").await;
        tags.put("mail:jdk-17+35", "done").await.unwrap();
        let branches = ledger(store, "branches.txt").await;
        branches.put("mail:master", "abc").await.unwrap();

        let reopened: Arc<dyn RefStore> = Arc::new(FileRefStore::new(&path).await.unwrap());
        let tags = ledger(reopened.clone(), "tags.txt").await;
        assert_eq!(tags.get("mail:jdk-17+35").await.as_deref(), Some("done"));
        let branches = ledger(reopened, "branches.txt").await;
        assert_eq!(branches.get("mail:master").await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn stale_parent_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileRefStore::new(dir.path().join("history.json")).await.unwrap();
        let identity = crate::traits::CommitIdentity::default();
        let request = WriteRequest {
            reference: "history",
            file: "tags.txt",
            content: "a done\n",
            parent: None,
            identity: &identity,
            message: "Updated tags",
        };

        assert!(matches!(store.write(request).await.unwrap(), WriteOutcome::Pushed(_)));
        assert!(matches!(
            store.write(request).await.unwrap(),
            WriteOutcome::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn recovers_from_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");

        let store: Arc<dyn RefStore> = Arc::new(FileRefStore::new(&path).await.unwrap());
        let tags = ledger(store, "tags.txt").await;
        tags.put("a", "done").await.unwrap();
        // second write creates the backup
        tags.put("b", "done").await.unwrap();

        fs::write(&path, b"corrupted json data").await.unwrap();

        let store: Arc<dyn RefStore> = Arc::new(FileRefStore::new(&path).await.unwrap());
        let tags = ledger(store, "tags.txt").await;
        assert_eq!(tags.get("a").await.as_deref(), Some("done"));
        assert_eq!(tags.get("b").await, None);
    }

    #[test]
    fn factory_checks_config_type() {
        let factory = FileRefStoreFactory;
        assert!(factory.create(&HistoryStoreConfig::Memory).is_err());
        let config = HistoryStoreConfig::File {
            path: "/tmp/notifybot-history.json".to_string(),
        };
        assert!(factory.create(&config).is_ok());
    }
}
