// # Memory Ref Store
//
// In-memory implementation of RefStore.
//
// ## Purpose
//
// Keeps every ledger commit in a map and enforces the same
// compare-and-swap rule as a git remote. Several ledgers opened on clones of
// one store race against each other exactly like bot instances sharing a
// remote, which makes this store the backbone of the concurrency tests.
//
// ## Crash Behavior
//
// - All history is lost on restart
// - The next start behaves like a first run and re-initializes the cursors
//
// ## Test hooks
//
// - `reject_next_writes`: refuse the next N writes as if a peer had won
// - `interleave_write`: apply a foreign write right before the next write
// - `reset`: move a reference back to an earlier commit

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::HistoryStoreConfig;
use crate::traits::{RefStore, RefStoreFactory, StoredFile, WriteOutcome, WriteRequest};
use crate::types::Hash;
use crate::Error;

#[derive(Debug, Clone)]
struct StoredCommit {
    files: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    reference: String,
    file: String,
    content: String,
}

#[derive(Debug, Default)]
struct MemoryRefs {
    heads: HashMap<String, Hash>,
    commits: HashMap<Hash, StoredCommit>,
    generation: u64,
    writes: usize,
    reject_next: usize,
    interleaved: Vec<PendingWrite>,
}

impl MemoryRefs {
    fn append(&mut self, reference: &str, file: &str, content: &str) -> Hash {
        let mut files = self
            .heads
            .get(reference)
            .and_then(|head| self.commits.get(head))
            .map(|commit| commit.files.clone())
            .unwrap_or_default();
        files.insert(file.to_string(), content.to_string());

        self.generation += 1;
        let hash = Hash::new(format!("{:040x}", self.generation));
        self.commits.insert(hash.clone(), StoredCommit { files });
        self.heads.insert(reference.to_string(), hash.clone());
        hash
    }
}

/// In-memory ref store implementation
///
/// Clones share the same underlying references.
///
/// # Example
///
/// ```rust,no_run
/// use notifybot_core::ledger::{Ledger, LedgerLocation, MemoryRefStore};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRefStore::new();
///     let ledger = Ledger::open(
///         Arc::new(store.clone()),
///         LedgerLocation::new("history", "tags.txt"),
///         10,
///     )
///     .await?;
///
///     ledger.put("mail:jdk-17+35", "done").await?;
///     assert!(store.head("history").await.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRefStore {
    inner: Arc<Mutex<MemoryRefs>>,
}

impl MemoryRefStore {
    /// Create a new store without any references
    pub fn new() -> Self {
        Self::default()
    }

    /// Current head of a reference
    pub async fn head(&self, reference: &str) -> Option<Hash> {
        self.inner.lock().await.heads.get(reference).cloned()
    }

    /// Content of a file at the head of a reference
    pub async fn content(&self, reference: &str, file: &str) -> Option<String> {
        let refs = self.inner.lock().await;
        let head = refs.heads.get(reference)?;
        refs.commits.get(head)?.files.get(file).cloned()
    }

    /// Move a reference to an earlier commit, like a forced push
    pub async fn reset(&self, reference: &str, hash: &Hash) -> Result<(), Error> {
        let mut refs = self.inner.lock().await;
        if !refs.commits.contains_key(hash) {
            return Err(Error::ledger(format!("Unknown ledger commit {hash}")));
        }
        refs.heads.insert(reference.to_string(), hash.clone());
        Ok(())
    }

    /// Refuse the next `count` writes as if another writer had moved the reference
    pub async fn reject_next_writes(&self, count: usize) {
        self.inner.lock().await.reject_next = count;
    }

    /// Apply a write from "another instance" just before the next write is checked
    pub async fn interleave_write(
        &self,
        reference: impl Into<String>,
        file: impl Into<String>,
        content: impl Into<String>,
    ) {
        self.inner.lock().await.interleaved.push(PendingWrite {
            reference: reference.into(),
            file: file.into(),
            content: content.into(),
        });
    }

    /// Number of accepted writes
    pub async fn write_count(&self) -> usize {
        self.inner.lock().await.writes
    }
}

#[async_trait]
impl RefStore for MemoryRefStore {
    async fn read(&self, reference: &str, file: &str) -> Result<Option<StoredFile>, Error> {
        let refs = self.inner.lock().await;
        let Some(head) = refs.heads.get(reference) else {
            return Ok(None);
        };
        let content = refs
            .commits
            .get(head)
            .and_then(|commit| commit.files.get(file).cloned())
            .unwrap_or_default();
        Ok(Some(StoredFile {
            head: head.clone(),
            content,
        }))
    }

    async fn write(&self, request: WriteRequest<'_>) -> Result<WriteOutcome, Error> {
        let mut refs = self.inner.lock().await;

        for pending in std::mem::take(&mut refs.interleaved) {
            refs.append(&pending.reference, &pending.file, &pending.content);
        }

        if refs.reject_next > 0 {
            refs.reject_next -= 1;
            return Ok(WriteOutcome::Rejected {
                details: "simulated concurrent update".to_string(),
            });
        }

        let current = refs.heads.get(request.reference);
        if current != request.parent {
            return Ok(WriteOutcome::Rejected {
                details: format!(
                    "{} is at {}, expected {}",
                    request.reference,
                    current.map(Hash::hex).unwrap_or("nothing"),
                    request.parent.map(Hash::hex).unwrap_or("nothing")
                ),
            });
        }

        let hash = refs.append(request.reference, request.file, request.content);
        refs.writes += 1;
        tracing::trace!(
            "{} advanced to {} ({})",
            request.reference,
            hash.abbreviate(),
            request.message
        );
        Ok(WriteOutcome::Pushed(hash))
    }
}

/// Factory for in-memory ref stores
#[derive(Debug, Default)]
pub struct MemoryRefStoreFactory;

impl RefStoreFactory for MemoryRefStoreFactory {
    fn create(&self, config: &HistoryStoreConfig) -> Result<Arc<dyn RefStore>, Error> {
        match config {
            HistoryStoreConfig::Memory => Ok(Arc::new(MemoryRefStore::new())),
            other => Err(Error::config(format!(
                "Memory store factory cannot handle {} configuration",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::CommitIdentity;

    fn request<'a>(
        file: &'a str,
        content: &'a str,
        parent: Option<&'a Hash>,
        identity: &'a CommitIdentity,
    ) -> WriteRequest<'a> {
        WriteRequest {
            reference: "history",
            file,
            content,
            parent,
            identity,
            message: "test",
        }
    }

    #[tokio::test]
    async fn compare_and_swap() {
        let store = MemoryRefStore::new();
        let identity = CommitIdentity::default();
        assert!(store.read("history", "tags.txt").await.unwrap().is_none());

        let WriteOutcome::Pushed(first) = store
            .write(request("tags.txt", "a done\n", None, &identity))
            .await
            .unwrap()
        else {
            panic!("first write should succeed");
        };

        // stale parent
        let outcome = store
            .write(request("tags.txt", "b done\n", None, &identity))
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Rejected { .. }));

        let outcome = store
            .write(request("tags.txt", "b done\n", Some(&first), &identity))
            .await
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Pushed(_)));
        assert_eq!(store.write_count().await, 2);
    }

    #[tokio::test]
    async fn files_share_a_reference() {
        let store = MemoryRefStore::new();
        let identity = CommitIdentity::default();
        let WriteOutcome::Pushed(head) = store
            .write(request("tags.txt", "t done\n", None, &identity))
            .await
            .unwrap()
        else {
            panic!("write should succeed");
        };
        store
            .write(request("branches.txt", "m:master abc\n", Some(&head), &identity))
            .await
            .unwrap();

        assert_eq!(store.content("history", "tags.txt").await.as_deref(), Some("t done\n"));
        let branches = store.read("history", "branches.txt").await.unwrap().unwrap();
        assert_eq!(branches.content, "m:master abc\n");
        assert_eq!(Some(branches.head), store.head("history").await);
    }

    #[tokio::test]
    async fn reset_moves_head_back() {
        let store = MemoryRefStore::new();
        let identity = CommitIdentity::default();
        let WriteOutcome::Pushed(first) = store
            .write(request("tags.txt", "one\n", None, &identity))
            .await
            .unwrap()
        else {
            panic!("write should succeed");
        };
        store
            .write(request("tags.txt", "two\n", Some(&first), &identity))
            .await
            .unwrap();

        store.reset("history", &first).await.unwrap();
        assert_eq!(store.content("history", "tags.txt").await.as_deref(), Some("one\n"));
        assert!(store.reset("history", &Hash::new("nope")).await.is_err());
    }

    #[test]
    fn factory_only_builds_memory_stores() {
        let factory = MemoryRefStoreFactory;
        assert!(factory.create(&HistoryStoreConfig::Memory).is_ok());
        let file = HistoryStoreConfig::File {
            path: "/tmp/x.json".to_string(),
        };
        assert!(factory.create(&file).is_err());
    }
}
