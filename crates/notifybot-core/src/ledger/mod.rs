// # Ledger
//
// A small key/value table stored as one text file on a reference of a
// [`RefStore`]. Each line holds `<key> <value>`; keys never contain
// whitespace, values never contain line breaks.
//
// ## Concurrency
//
// Several bot instances may share a ledger. Updates go through
// [`Ledger::commit`], which reads the current head, applies a change
// function, and asks the store to write on top of that head. When another
// writer moved the reference in between, the write is rejected and the whole
// read/change/write sequence runs again, up to a bounded number of attempts.
// Change functions must therefore be pure: they can run several times.
//
// ## Implementations of the store
//
// - `memory`: in-process store with test hooks
// - `file`: local JSON file with crash recovery

pub mod file;
pub mod memory;

pub use file::{FileRefStore, FileRefStoreFactory};
pub use memory::{MemoryRefStore, MemoryRefStoreFactory};

use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::traits::{CommitIdentity, RefStore, WriteOutcome, WriteRequest};
use crate::types::Hash;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Ordered key/value entries of a ledger
///
/// Insertion order is kept so the serialized file changes as little as
/// possible between updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerEntries {
    entries: IndexMap<String, String>,
}

impl LedgerEntries {
    /// Parse the file format. Blank lines and lines without a value are ignored.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let (key, value) = line.trim_end().split_once(' ')?;
                (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
            })
            .collect();
        Self { entries }
    }

    /// Render the file format, one entry per line
    pub fn serialize(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key} {value}\n"))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace a value. Existing keys keep their position.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in &self.entries {
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(Error::invalid_input(format!("Invalid ledger key: {key:?}")));
            }
            if value.contains(['\n', '\r']) {
                return Err(Error::invalid_input(format!(
                    "Ledger value for {key} contains a line break"
                )));
            }
        }
        Ok(())
    }
}

/// Where a ledger is stored and how its commits are signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerLocation {
    pub reference: String,
    pub file: String,
    pub identity: CommitIdentity,
    pub message: String,
}

impl LedgerLocation {
    pub fn new(reference: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            file: file.into(),
            identity: CommitIdentity::default(),
            message: "Updated ledger".to_string(),
        }
    }

    /// Build a location from configuration
    pub fn from_config(config: &LedgerConfig, identity: &CommitIdentity) -> Self {
        Self {
            reference: config.reference.clone(),
            file: config.file.clone(),
            identity: identity.clone(),
            message: config.message.clone(),
        }
    }

    pub fn with_identity(mut self, identity: CommitIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    head: Option<Hash>,
    entries: LedgerEntries,
}

/// Optimistic-concurrency key/value ledger
///
/// Reads are served from the snapshot taken by the last [`Ledger::refresh`]
/// or successful write. Writes always start from the store's current head.
pub struct Ledger {
    store: Arc<dyn RefStore>,
    location: LedgerLocation,
    max_attempts: usize,
    snapshot: RwLock<Snapshot>,
}

impl Ledger {
    /// Open a ledger and load its current content
    ///
    /// # Parameters
    ///
    /// - `store`: Backend holding the reference
    /// - `location`: Reference, file and commit identity
    /// - `max_attempts`: Push attempts per write before giving up
    pub async fn open(
        store: Arc<dyn RefStore>,
        location: LedgerLocation,
        max_attempts: usize,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::config("Ledger push attempts must be > 0"));
        }
        let ledger = Self {
            store,
            location,
            max_attempts,
            snapshot: RwLock::new(Snapshot::default()),
        };
        ledger.refresh().await?;
        Ok(ledger)
    }

    pub fn location(&self) -> &LedgerLocation {
        &self.location
    }

    /// Re-read the ledger from the store
    pub async fn refresh(&self) -> Result<()> {
        let (head, entries) = self.load().await?;
        debug!(
            "Loaded {} entries from {}:{}",
            entries.len(),
            self.location.reference,
            self.location.file
        );
        *self.snapshot.write().await = Snapshot { head, entries };
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.snapshot.read().await.entries.get(key).map(str::to_string)
    }

    /// Copy of all entries
    pub async fn entries(&self) -> LedgerEntries {
        self.snapshot.read().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot.read().await.entries.is_empty()
    }

    /// Head the snapshot was read from, `None` before the first write
    pub async fn head(&self) -> Option<Hash> {
        self.snapshot.read().await.head.clone()
    }

    /// Set a single entry
    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        self.commit(move |entries| entries.put(key.clone(), value.clone()))
            .await
    }

    /// Remove a single entry
    pub async fn delete(&self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        self.commit(move |entries| {
            entries.delete(&key);
        })
        .await
    }

    /// Apply a change on top of the latest stored content
    ///
    /// `change` may run several times, once per attempt, each time against
    /// freshly read entries. A change that leaves the entries untouched
    /// writes nothing.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The change is stored
    /// - `Err(Error::LedgerConflict)`: Every attempt lost the race
    /// - `Err(Error)`: Storage error or invalid entries
    pub async fn commit<F>(&self, change: F) -> Result<()>
    where
        F: Fn(&mut LedgerEntries) + Send + Sync,
    {
        let mut details = String::new();

        for attempt in 1..=self.max_attempts {
            let (head, current) = self.load().await?;
            let mut updated = current.clone();
            change(&mut updated);

            if updated == current {
                debug!(
                    "No changes for {}:{}, skipping write",
                    self.location.reference, self.location.file
                );
                *self.snapshot.write().await = Snapshot {
                    head,
                    entries: updated,
                };
                return Ok(());
            }
            updated.validate()?;

            let content = updated.serialize();
            let request = WriteRequest {
                reference: &self.location.reference,
                file: &self.location.file,
                content: &content,
                parent: head.as_ref(),
                identity: &self.location.identity,
                message: &self.location.message,
            };

            match self.store.write(request).await? {
                WriteOutcome::Pushed(new_head) => {
                    debug!(
                        "Stored {} entries in {}:{} at {}",
                        updated.len(),
                        self.location.reference,
                        self.location.file,
                        new_head.abbreviate()
                    );
                    *self.snapshot.write().await = Snapshot {
                        head: Some(new_head),
                        entries: updated,
                    };
                    return Ok(());
                }
                WriteOutcome::Rejected { details: reason } => {
                    warn!(
                        "Write to {}:{} rejected (attempt {}/{}): {}",
                        self.location.reference,
                        self.location.file,
                        attempt,
                        self.max_attempts,
                        reason
                    );
                    details = reason;
                }
            }
        }

        Err(Error::LedgerConflict {
            reference: self.location.reference.clone(),
            attempts: self.max_attempts,
            details,
        })
    }

    async fn load(&self) -> Result<(Option<Hash>, LedgerEntries)> {
        let stored = self
            .store
            .read(&self.location.reference, &self.location.file)
            .await?;
        Ok(match stored {
            Some(file) => (Some(file.head), LedgerEntries::parse(&file.content)),
            None => (None, LedgerEntries::default()),
        })
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("location", &self.location)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn open(store: &MemoryRefStore, attempts: usize) -> Ledger {
        Ledger::open(
            Arc::new(store.clone()),
            LedgerLocation::new("history", "tags.txt"),
            attempts,
        )
        .await
        .unwrap()
    }

    #[test]
    fn parses_and_serializes_lines() {
        let entries = LedgerEntries::parse("a:jdk-17+1 done\n\nbroken\nb:master cafebabe\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.get("a:jdk-17+1"), Some("done"));
        assert_eq!(entries.get("b:master"), Some("cafebabe"));
        assert_eq!(entries.serialize(), "a:jdk-17+1 done\nb:master cafebabe\n");
    }

    #[test]
    fn replacing_keeps_position() {
        let mut entries = LedgerEntries::default();
        entries.put("one", "1");
        entries.put("two", "2");
        entries.put("one", "uno");
        assert_eq!(entries.serialize(), "one uno\ntwo 2\n");
        assert_eq!(entries.delete("one"), Some("uno".to_string()));
        assert_eq!(entries.serialize(), "two 2\n");
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryRefStore::new();
        let ledger = open(&store, 3).await;
        assert!(ledger.is_empty().await);
        assert_eq!(ledger.head().await, None);

        ledger.put("mail:master", "abc").await.unwrap();
        assert_eq!(ledger.get("mail:master").await.as_deref(), Some("abc"));
        assert_eq!(ledger.head().await, store.head("history").await);

        ledger.delete("mail:master").await.unwrap();
        assert_eq!(ledger.get("mail:master").await, None);
        assert_eq!(store.content("history", "tags.txt").await.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn unchanged_content_writes_nothing() {
        let store = MemoryRefStore::new();
        let ledger = open(&store, 3).await;
        ledger.put("k", "v").await.unwrap();
        let writes = store.write_count().await;

        ledger.put("k", "v").await.unwrap();
        assert_eq!(store.write_count().await, writes);
    }

    #[tokio::test]
    async fn rejected_writes_rerun_the_change() {
        let store = MemoryRefStore::new();
        let ledger = open(&store, 5).await;
        store.reject_next_writes(2).await;

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        ledger
            .commit(move |entries| {
                counter.fetch_add(1, Ordering::SeqCst);
                entries.put("k", "v");
            })
            .await
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(ledger.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let store = MemoryRefStore::new();
        let ledger = open(&store, 3).await;
        store.reject_next_writes(3).await;

        let err = ledger.put("k", "v").await.unwrap_err();
        assert!(matches!(err, Error::LedgerConflict { attempts: 3, .. }));
        assert!(err.is_retriable());
        assert_eq!(store.content("history", "tags.txt").await, None);
    }

    #[tokio::test]
    async fn rejects_keys_with_whitespace() {
        let store = MemoryRefStore::new();
        let ledger = open(&store, 3).await;
        let err = ledger.put("bad key", "v").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn zero_attempts_is_a_config_error() {
        let result = Ledger::open(
            Arc::new(MemoryRefStore::new()),
            LedgerLocation::new("history", "tags.txt"),
            0,
        )
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
