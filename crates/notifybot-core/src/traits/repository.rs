// # Repository Trait
//
// Defines the read-only view of the repository being watched.
//
// ## Purpose
//
// The poller and the reconciliation step only ever ask questions about
// history: which branches and tags exist, which commits lie between two
// points, and whether one commit is an ancestor of another. Keeping those
// questions behind a trait lets the engine run against a real git clone or
// an in-memory commit graph.
//
// ## Implementations
//
// - `notifybot_git::GitRepository`: local mirror driven by the git CLI
// - `notifybot_core::vcs::MemoryRepository`: in-memory graph for tests

use crate::types::{Annotation, Commit, CommitRange, Hash, Reference, Tag};
use async_trait::async_trait;

/// Read access to a repository
///
/// Implementations must be thread-safe; the engine shares one instance with
/// every notifier through [`crate::traits::NotifyContext`].
#[async_trait]
pub trait Repository: Send + Sync {
    /// Human readable repository name, used in subjects and file names
    fn name(&self) -> &str;

    /// Bring the local view up to date with the remote
    ///
    /// # Returns
    ///
    /// - `Ok(())`: All branches and tags were refreshed
    /// - `Err(Error)`: The remote could not be reached
    async fn fetch_all(&self) -> Result<(), crate::Error>;

    /// All branches with their current tips, sorted by name
    async fn branches(&self) -> Result<Vec<Reference>, crate::Error>;

    /// All tags, sorted by name
    async fn tags(&self) -> Result<Vec<Tag>, crate::Error>;

    /// Resolve a branch name, tag name or hash to a commit
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Hash))`: The commit the revision points to
    /// - `Ok(None)`: No such revision
    /// - `Err(Error)`: Repository error
    async fn resolve(&self, rev: &str) -> Result<Option<Hash>, crate::Error>;

    /// Commits in a range, oldest first
    async fn commits(&self, range: &CommitRange) -> Result<Vec<Commit>, crate::Error>;

    /// Number of commits in a range
    async fn commit_count(&self, range: &CommitRange) -> Result<usize, crate::Error>;

    /// Whether `ancestor` is reachable from `descendant`
    ///
    /// A commit counts as its own ancestor.
    async fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> Result<bool, crate::Error>;

    /// Look up a single commit by revision
    async fn lookup(&self, rev: &str) -> Result<Option<Commit>, crate::Error>;

    /// Annotation of a tag, `None` for lightweight tags
    async fn annotate(&self, tag: &Tag) -> Result<Option<Annotation>, crate::Error>;

    /// Number of commits reachable from any branch
    async fn total_commits(&self) -> Result<usize, crate::Error>;
}
