//! Per-notifier delivery history.
//!
//! Two ledgers back the history. The tag ledger maps `<updater>:<tag>` to
//! `done` or `retry`; the branch ledger maps `<updater>:<branch>` to the
//! last commit delivered on that branch (the cursor). Keys are namespaced
//! by updater so each notifier progresses independently.

use crate::config::HistoryConfig;
use crate::error::{Error, Result};
use crate::ledger::{Ledger, LedgerLocation};
use crate::traits::RefStore;
use crate::types::{Branch, Hash, Tag};
use std::sync::Arc;
use tracing::debug;

const TAG_DONE: &str = "done";
const TAG_RETRY: &str = "retry";

/// Delivery state of a tag for one updater
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStatus {
    /// Delivered, or deliberately skipped
    Done,
    /// An earlier delivery failed and should be repeated
    NeedsRetry,
}

impl TagStatus {
    fn as_str(self) -> &'static str {
        match self {
            TagStatus::Done => TAG_DONE,
            TagStatus::NeedsRetry => TAG_RETRY,
        }
    }

    fn parse(value: &str) -> Self {
        // anything but an explicit retry counts as handled
        if value == TAG_RETRY {
            TagStatus::NeedsRetry
        } else {
            TagStatus::Done
        }
    }
}

/// Check that a name can be used as a history namespace
pub fn validate_updater_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(char::is_whitespace) || name.contains(':') {
        return Err(Error::invalid_input(format!(
            "Invalid updater name {name:?}: must be non-empty without whitespace or ':'"
        )));
    }
    Ok(())
}

fn key(updater: &str, name: &str) -> Result<String> {
    validate_updater_name(updater)?;
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(Error::invalid_input(format!("Invalid ref name {name:?}")));
    }
    Ok(format!("{updater}:{name}"))
}

/// A batch of history changes written with one commit per ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryUpdate {
    tags: Vec<(String, TagStatus)>,
    branches: Vec<(String, Hash)>,
}

impl HistoryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status of a tag for an updater
    pub fn mark_tag(&mut self, tag: &Tag, updater: &str, status: TagStatus) -> Result<()> {
        self.tags.push((key(updater, tag.name())?, status));
        Ok(())
    }

    /// Move the cursor of a branch for an updater
    pub fn set_branch(&mut self, branch: &Branch, updater: &str, hash: &Hash) -> Result<()> {
        self.branches.push((key(updater, branch.name())?, hash.clone()));
        Ok(())
    }

    /// Append another batch; later entries win on conflicts
    pub fn extend(&mut self, other: HistoryUpdate) {
        self.tags.extend(other.tags);
        self.branches.extend(other.branches);
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.branches.is_empty()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }
}

/// Durable record of what each updater has been told
#[derive(Debug)]
pub struct UpdateHistory {
    tags: Ledger,
    branches: Ledger,
}

impl UpdateHistory {
    /// Wrap two already opened ledgers
    pub fn new(tags: Ledger, branches: Ledger) -> Self {
        Self { tags, branches }
    }

    /// Open both ledgers on a store as described by the configuration
    pub async fn open(store: Arc<dyn RefStore>, config: &HistoryConfig) -> Result<Self> {
        config.validate()?;
        let tags = Ledger::open(
            store.clone(),
            LedgerLocation::from_config(&config.tags, &config.identity),
            config.max_push_attempts,
        )
        .await?;
        let branches = Ledger::open(
            store,
            LedgerLocation::from_config(&config.branches, &config.identity),
            config.max_push_attempts,
        )
        .await?;
        Ok(Self::new(tags, branches))
    }

    /// Re-read both ledgers from the store
    pub async fn refresh(&self) -> Result<()> {
        self.tags.refresh().await?;
        self.branches.refresh().await
    }

    /// True when no branch cursor has ever been recorded
    pub async fn is_empty(&self) -> bool {
        self.branches.is_empty().await
    }

    pub async fn tag_status(&self, tag: &Tag, updater: &str) -> Result<Option<TagStatus>> {
        let key = key(updater, tag.name())?;
        Ok(self.tags.get(&key).await.map(|v| TagStatus::parse(&v)))
    }

    /// Whether the tag has any entry for the updater
    pub async fn has_tag(&self, tag: &Tag, updater: &str) -> Result<bool> {
        Ok(self.tag_status(tag, updater).await?.is_some())
    }

    pub async fn should_retry_tag_update(&self, tag: &Tag, updater: &str) -> Result<bool> {
        Ok(self.tag_status(tag, updater).await? == Some(TagStatus::NeedsRetry))
    }

    /// Mark tags as delivered for an updater
    pub async fn add_tags(&self, tags: &[Tag], updater: &str) -> Result<()> {
        let mut update = HistoryUpdate::new();
        for tag in tags {
            update.mark_tag(tag, updater, TagStatus::Done)?;
        }
        self.apply(&update).await
    }

    /// Flag a tag so its delivery is repeated
    pub async fn retry_tag_update(&self, tag: &Tag, updater: &str) -> Result<()> {
        let mut update = HistoryUpdate::new();
        update.mark_tag(tag, updater, TagStatus::NeedsRetry)?;
        self.apply(&update).await
    }

    /// Cursor of a branch for an updater
    pub async fn branch_hash(&self, branch: &Branch, updater: &str) -> Result<Option<Hash>> {
        let key = key(updater, branch.name())?;
        Ok(self.branches.get(&key).await.map(Hash::new))
    }

    pub async fn set_branch_hash(&self, branch: &Branch, updater: &str, hash: &Hash) -> Result<()> {
        let mut update = HistoryUpdate::new();
        update.set_branch(branch, updater, hash)?;
        self.apply(&update).await
    }

    /// Write a batch, one ledger commit per touched ledger
    ///
    /// Branch cursors are written before tag flags. The two commits are not
    /// atomic: when the second one fails the first stays recorded.
    pub async fn apply(&self, update: &HistoryUpdate) -> Result<()> {
        if !update.branches.is_empty() {
            let cursors = update.branches.clone();
            self.branches
                .commit(move |entries| {
                    for (key, hash) in &cursors {
                        entries.put(key.clone(), hash.hex());
                    }
                })
                .await?;
            debug!("Recorded {} branch cursors", update.branches.len());
        }

        if !update.tags.is_empty() {
            let marks = update.tags.clone();
            self.tags
                .commit(move |entries| {
                    for (key, status) in &marks {
                        entries.put(key.clone(), status.as_str());
                    }
                })
                .await?;
            debug!("Recorded {} tag entries", update.tags.len());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryRefStore;

    async fn history(store: &MemoryRefStore) -> UpdateHistory {
        UpdateHistory::open(Arc::new(store.clone()), &HistoryConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn branch_cursors_are_namespaced() {
        let store = MemoryRefStore::new();
        let history = history(&store).await;
        let master = Branch::new("master");
        assert!(history.is_empty().await);

        history
            .set_branch_hash(&master, "mail", &Hash::new("aaaa"))
            .await
            .unwrap();
        history
            .set_branch_hash(&master, "json", &Hash::new("bbbb"))
            .await
            .unwrap();

        assert!(!history.is_empty().await);
        assert_eq!(
            history.branch_hash(&master, "mail").await.unwrap(),
            Some(Hash::new("aaaa"))
        );
        assert_eq!(
            history.branch_hash(&master, "json").await.unwrap(),
            Some(Hash::new("bbbb"))
        );
        assert_eq!(
            history.branch_hash(&Branch::new("jdk17"), "mail").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn tag_retry_flag() {
        let store = MemoryRefStore::new();
        let history = history(&store).await;
        let tag = Tag::new("jdk-17+35");

        assert!(!history.has_tag(&tag, "mail").await.unwrap());
        history.retry_tag_update(&tag, "mail").await.unwrap();
        assert!(history.has_tag(&tag, "mail").await.unwrap());
        assert!(history.should_retry_tag_update(&tag, "mail").await.unwrap());

        history.add_tags(&[tag.clone()], "mail").await.unwrap();
        assert!(!history.should_retry_tag_update(&tag, "mail").await.unwrap());
        assert_eq!(
            history.tag_status(&tag, "mail").await.unwrap(),
            Some(TagStatus::Done)
        );
        assert!(!history.has_tag(&tag, "json").await.unwrap());
    }

    #[tokio::test]
    async fn batch_writes_one_commit_per_ledger() {
        let store = MemoryRefStore::new();
        let history = history(&store).await;

        let mut update = HistoryUpdate::new();
        update
            .mark_tag(&Tag::new("jdk-17+1"), "mail", TagStatus::Done)
            .unwrap();
        update
            .mark_tag(&Tag::new("jdk-17+2"), "mail", TagStatus::Done)
            .unwrap();
        update
            .set_branch(&Branch::new("master"), "mail", &Hash::new("cccc"))
            .unwrap();
        history.apply(&update).await.unwrap();

        assert_eq!(store.write_count().await, 2);
        assert_eq!(
            store.content("history", "tags.txt").await.as_deref(),
            Some("mail:jdk-17+1 done\nmail:jdk-17+2 done\n")
        );
    }

    /// Refuses every write to one ledger file
    struct FailingFile {
        inner: MemoryRefStore,
        file: &'static str,
    }

    #[async_trait::async_trait]
    impl RefStore for FailingFile {
        async fn read(&self, reference: &str, file: &str) -> Result<Option<crate::traits::StoredFile>> {
            self.inner.read(reference, file).await
        }

        async fn write(
            &self,
            request: crate::traits::WriteRequest<'_>,
        ) -> Result<crate::traits::WriteOutcome> {
            if request.file == self.file {
                return Err(Error::ledger("unreachable remote"));
            }
            self.inner.write(request).await
        }
    }

    #[tokio::test]
    async fn cursors_are_written_before_tags() {
        let store = MemoryRefStore::new();
        let failing = FailingFile {
            inner: store.clone(),
            file: "tags.txt",
        };
        let history = UpdateHistory::open(Arc::new(failing), &HistoryConfig::default())
            .await
            .unwrap();

        let mut update = HistoryUpdate::new();
        update
            .mark_tag(&Tag::new("jdk-17+1"), "mail", TagStatus::Done)
            .unwrap();
        update
            .set_branch(&Branch::new("master"), "mail", &Hash::new("cccc"))
            .unwrap();
        assert!(history.apply(&update).await.is_err());

        assert_eq!(
            store.content("history", "branches.txt").await.as_deref(),
            Some("mail:master cccc\n")
        );
        assert_eq!(store.content("history", "tags.txt").await, None);
    }

    #[tokio::test]
    async fn sees_writes_of_other_instances_after_refresh() {
        let store = MemoryRefStore::new();
        let first = history(&store).await;
        let second = history(&store).await;
        let tag = Tag::new("jdk-17+35");

        first.add_tags(&[tag.clone()], "mail").await.unwrap();
        assert!(!second.has_tag(&tag, "mail").await.unwrap());
        second.refresh().await.unwrap();
        assert!(second.has_tag(&tag, "mail").await.unwrap());
    }

    #[test]
    fn rejects_bad_updater_names() {
        assert!(validate_updater_name("mail").is_ok());
        for name in ["", "has space", "a:b"] {
            assert!(validate_updater_name(name).is_err(), "{name:?}");
        }
        let mut update = HistoryUpdate::new();
        assert!(update
            .set_branch(&Branch::new("master"), "a:b", &Hash::new("1"))
            .is_err());
    }
}
