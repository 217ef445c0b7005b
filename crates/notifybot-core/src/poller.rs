//! Repository polling.
//!
//! The poller refreshes the repository and splits its branches into the
//! watched set (branches that produce commit events) and the candidate set
//! (every non-excluded branch, used when looking for a new branch's parent).

use crate::error::Result;
use crate::traits::Repository;
use crate::types::{Reference, Tag};
use regex::Regex;
use tracing::debug;

/// Branches and tags seen by one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositorySnapshot {
    /// Non-excluded branches, sorted by name
    pub candidates: Vec<Reference>,
    /// Candidates matching the watch pattern, sorted by name
    pub watched: Vec<Reference>,
    /// All tags, sorted by name
    pub tags: Vec<Tag>,
}

impl RepositorySnapshot {
    pub fn is_watched(&self, reference: &Reference) -> bool {
        self.watched.iter().any(|w| w.name == reference.name)
    }
}

/// Branch selection rules
#[derive(Debug, Clone)]
pub struct RepositoryPoller {
    watched: Regex,
    excluded: Regex,
}

impl RepositoryPoller {
    /// Compile the patterns. Both must match a whole branch name.
    pub fn new(watched: &str, excluded: &str) -> Result<Self> {
        Ok(Self {
            watched: anchored(watched)?,
            excluded: anchored(excluded)?,
        })
    }

    pub fn is_excluded(&self, branch: &str) -> bool {
        self.excluded.is_match(branch)
    }

    pub fn is_watched(&self, branch: &str) -> bool {
        !self.is_excluded(branch) && self.watched.is_match(branch)
    }

    /// Fetch and list the repository
    ///
    /// # Returns
    ///
    /// - `Ok(RepositorySnapshot)`: Current branches and tags
    /// - `Err(Error)`: The fetch or a listing failed; nothing was changed
    pub async fn poll(&self, repository: &dyn Repository) -> Result<RepositorySnapshot> {
        repository.fetch_all().await?;

        let mut candidates: Vec<_> = repository
            .branches()
            .await?
            .into_iter()
            .filter(|r| !self.is_excluded(r.name.name()))
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));

        let watched: Vec<_> = candidates
            .iter()
            .filter(|r| self.watched.is_match(r.name.name()))
            .cloned()
            .collect();

        let mut tags = repository.tags().await?;
        tags.sort();

        debug!(
            "Polled {}: {} branches ({} watched), {} tags",
            repository.name(),
            candidates.len(),
            watched.len(),
            tags.len()
        );

        Ok(RepositorySnapshot {
            candidates,
            watched,
            tags,
        })
    }
}

fn anchored(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{pattern})$"))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::MemoryRepository;

    #[test]
    fn patterns_match_whole_names() {
        let poller = RepositoryPoller::new("master|jdk[0-9]+", "pr/.*").unwrap();
        assert!(poller.is_watched("master"));
        assert!(poller.is_watched("jdk17"));
        assert!(!poller.is_watched("jdk17u-dev"));
        assert!(!poller.is_watched("old-master"));
        assert!(poller.is_excluded("pr/1234"));
        assert!(!poller.is_excluded("prototype"));
    }

    #[test]
    fn invalid_pattern() {
        assert!(RepositoryPoller::new("(", "pr/.*").is_err());
    }

    #[tokio::test]
    async fn snapshot_excludes_pull_request_branches() {
        let repo = MemoryRepository::new("jdk");
        let base = repo.commit("master", "base");
        repo.branch("pr/17", &base);
        repo.branch("sandbox", &base);
        repo.tag("jdk-17+1", &base);

        let poller = RepositoryPoller::new("master", "pr/.*").unwrap();
        let snapshot = poller.poll(&repo).await.unwrap();

        let candidates: Vec<_> = snapshot.candidates.iter().map(|r| r.name.name()).collect();
        assert_eq!(candidates, ["master", "sandbox"]);
        assert_eq!(snapshot.watched.len(), 1);
        assert!(snapshot.is_watched(&snapshot.candidates[0]));
        assert_eq!(snapshot.tags, vec![Tag::new("jdk-17+1")]);
    }
}
