// # Ref Store Trait
//
// Defines compare-and-swap storage of small text files on a named reference.
//
// ## Purpose
//
// The update history is kept in ordinary commits on a dedicated reference
// so several bot instances can share it. Every write names the commit it
// was based on; the store accepts the write only if the reference still
// points there. A lost race is reported as `WriteOutcome::Rejected`, not
// as an error, so the ledger can re-read and try again.
//
// ## Implementations
//
// - Git remote: `notifybot_git::GitRefStore`
// - Local JSON file: `notifybot_core::ledger::FileRefStore`
// - In memory: `notifybot_core::ledger::MemoryRefStore`

use crate::config::HistoryStoreConfig;
use crate::types::Hash;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity recorded on ledger commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl CommitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self::new("notifybot", "notifybot@localhost")
    }
}

/// A file read from the head of a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Commit the reference pointed to when the file was read
    pub head: Hash,
    /// File content, empty when the file does not exist in that commit
    pub content: String,
}

/// A single compare-and-swap write
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    pub reference: &'a str,
    pub file: &'a str,
    pub content: &'a str,
    /// Expected current head, `None` when the reference should not exist yet
    pub parent: Option<&'a Hash>,
    pub identity: &'a CommitIdentity,
    pub message: &'a str,
}

/// Result of a write attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The reference now points to this commit
    Pushed(Hash),
    /// The reference moved since `parent` was read
    Rejected { details: String },
}

/// Trait for compare-and-swap reference storage
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks and,
/// for shared backends, from multiple processes. Exclusion between writers
/// comes solely from the parent check in [`RefStore::write`].
#[async_trait]
pub trait RefStore: Send + Sync {
    /// Read a file from the current head of a reference
    ///
    /// # Parameters
    ///
    /// - `reference`: Reference name, e.g. `history`
    /// - `file`: Path of the file inside the commit
    ///
    /// # Returns
    ///
    /// - `Ok(Some(StoredFile))`: The head and the file content
    /// - `Ok(None)`: The reference does not exist yet
    /// - `Err(Error)`: Storage error
    async fn read(&self, reference: &str, file: &str) -> Result<Option<StoredFile>, crate::Error>;

    /// Write a file as a new commit on top of `request.parent`
    ///
    /// Other files in the parent commit are carried over unchanged.
    ///
    /// # Returns
    ///
    /// - `Ok(WriteOutcome::Pushed)`: The reference was advanced
    /// - `Ok(WriteOutcome::Rejected)`: Another writer got there first
    /// - `Err(Error)`: Storage error
    async fn write(&self, request: WriteRequest<'_>) -> Result<WriteOutcome, crate::Error>;
}

/// Helper trait for constructing ref stores from configuration
pub trait RefStoreFactory: Send + Sync {
    /// Create a RefStore instance from configuration
    fn create(&self, config: &HistoryStoreConfig) -> Result<Arc<dyn RefStore>, crate::Error>;
}
