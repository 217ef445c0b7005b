// # Memory Repository
//
// In-memory commit graph implementing the Repository trait.
//
// ## Purpose
//
// Lets the engine, the reconciliation step and notifier crates be exercised
// without a git binary. Commits get sequential hashes and timestamps, so
// test output is deterministic.
//
// ## Building history
//
// - `commit(branch, message)`: new commit on top of a branch, creating it
// - `branch(name, from)`: new branch at an existing commit
// - `merge(branch, other, message)`: two-parent commit
// - `tag(name, target)` / `annotated_tag(...)`: lightweight or annotated tags
// - `force_branch(name, hash)`: move a branch anywhere, like a forced push

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::Repository;
use crate::types::{Annotation, Author, Branch, Commit, CommitRange, Hash, Reference, Tag};
use crate::Error;

const BASE_TIMESTAMP: i64 = 1_700_000_000;

#[derive(Debug, Default)]
struct Graph {
    commits: HashMap<Hash, (usize, Commit)>,
    branches: BTreeMap<String, Hash>,
    tags: BTreeMap<String, (Hash, Option<Annotation>)>,
    sequence: usize,
}

impl Graph {
    fn next_time(&mut self) -> (usize, DateTime<Utc>) {
        self.sequence += 1;
        let time = DateTime::from_timestamp(BASE_TIMESTAMP + self.sequence as i64 * 60, 0)
            .unwrap_or_default();
        (self.sequence, time)
    }

    fn add_commit(&mut self, parents: Vec<Hash>, message: &str, author: &Author) -> Hash {
        let (sequence, time) = self.next_time();
        let hash = Hash::new(format!("{sequence:040x}"));
        let commit = Commit {
            hash: hash.clone(),
            parents,
            author: author.clone(),
            committer: author.clone(),
            authored: time,
            committed: time,
            message: message.lines().map(str::to_string).collect(),
        };
        self.commits.insert(hash.clone(), (sequence, commit));
        hash
    }

    fn resolve(&self, rev: &str) -> Option<Hash> {
        if let Some(hash) = self.branches.get(rev) {
            return Some(hash.clone());
        }
        if let Some((hash, _)) = self.tags.get(rev) {
            return Some(hash.clone());
        }
        let hash = Hash::new(rev);
        self.commits.contains_key(&hash).then_some(hash)
    }

    fn reachable(&self, from: &Hash) -> HashSet<Hash> {
        let mut seen = HashSet::new();
        let mut pending = vec![from.clone()];
        while let Some(hash) = pending.pop() {
            if let Some((_, commit)) = self.commits.get(&hash) {
                if seen.insert(hash) {
                    pending.extend(commit.parents.iter().cloned());
                }
            }
        }
        seen
    }

    fn range(&self, range: &CommitRange) -> Result<Vec<Commit>, Error> {
        if !self.commits.contains_key(&range.to) {
            return Err(Error::vcs(format!("Unknown revision {}", range.to)));
        }
        let mut included = self.reachable(&range.to);
        if let Some(from) = &range.from {
            if !self.commits.contains_key(from) {
                return Err(Error::vcs(format!("Unknown revision {from}")));
            }
            for hash in self.reachable(from) {
                included.remove(&hash);
            }
        }

        // sequence numbers are a topological order
        let mut commits: Vec<_> = included
            .iter()
            .filter_map(|hash| self.commits.get(hash))
            .collect();
        commits.sort_by_key(|(sequence, _)| *sequence);
        Ok(commits.into_iter().map(|(_, c)| c.clone()).collect())
    }
}

/// In-memory repository
///
/// Clones share the same graph, so a test can keep a handle for adding
/// commits while the engine owns another.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    name: String,
    author: Author,
    graph: Arc<RwLock<Graph>>,
    fail_next_fetch: Arc<AtomicBool>,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            author: Author::new("duke", "duke@openjdk.org"),
            graph: Arc::new(RwLock::new(Graph::default())),
            fail_next_fetch: Arc::new(AtomicBool::new(false)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Graph> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a commit on top of `branch`, creating the branch as a new root
    /// when it does not exist
    pub fn commit(&self, branch: &str, message: &str) -> Hash {
        let mut graph = self.write();
        let parents = graph.branches.get(branch).cloned().into_iter().collect();
        let hash = graph.add_commit(parents, message, &self.author);
        graph.branches.insert(branch.to_string(), hash.clone());
        hash
    }

    /// Create a branch at an existing commit
    pub fn branch(&self, name: &str, from: &Hash) {
        self.write().branches.insert(name.to_string(), from.clone());
    }

    /// Point a branch anywhere, even backwards
    pub fn force_branch(&self, name: &str, hash: &Hash) {
        self.branch(name, hash);
    }

    pub fn delete_branch(&self, name: &str) {
        self.write().branches.remove(name);
    }

    /// Add a merge commit of `other` into `branch`
    pub fn merge(&self, branch: &str, other: &Hash, message: &str) -> Result<Hash, Error> {
        let mut graph = self.write();
        let head = graph
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| Error::vcs(format!("Unknown branch {branch}")))?;
        let hash = graph.add_commit(vec![head, other.clone()], message, &self.author);
        graph.branches.insert(branch.to_string(), hash.clone());
        Ok(hash)
    }

    /// Add a lightweight tag
    pub fn tag(&self, name: &str, target: &Hash) {
        self.write()
            .tags
            .insert(name.to_string(), (target.clone(), None));
    }

    /// Add an annotated tag
    pub fn annotated_tag(&self, name: &str, target: &Hash, tagger: &Author, message: &str) {
        let mut graph = self.write();
        let (_, date) = graph.next_time();
        let annotation = Annotation {
            name: Tag::new(name),
            target: target.clone(),
            author: tagger.clone(),
            date,
            message: message.to_string(),
        };
        graph
            .tags
            .insert(name.to_string(), (target.clone(), Some(annotation)));
    }

    /// Make the next `fetch_all` fail, as if the remote were unreachable
    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_all(&self) -> Result<(), Error> {
        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(Error::vcs(format!("Failed to fetch {}", self.name)));
        }
        Ok(())
    }

    async fn branches(&self) -> Result<Vec<Reference>, Error> {
        Ok(self
            .read()
            .branches
            .iter()
            .map(|(name, hash)| Reference {
                name: Branch::new(name.clone()),
                hash: hash.clone(),
            })
            .collect())
    }

    async fn tags(&self) -> Result<Vec<Tag>, Error> {
        Ok(self.read().tags.keys().map(Tag::new).collect())
    }

    async fn resolve(&self, rev: &str) -> Result<Option<Hash>, Error> {
        Ok(self.read().resolve(rev))
    }

    async fn commits(&self, range: &CommitRange) -> Result<Vec<Commit>, Error> {
        self.read().range(range)
    }

    async fn commit_count(&self, range: &CommitRange) -> Result<usize, Error> {
        Ok(self.read().range(range)?.len())
    }

    async fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> Result<bool, Error> {
        Ok(self.read().reachable(descendant).contains(ancestor))
    }

    async fn lookup(&self, rev: &str) -> Result<Option<Commit>, Error> {
        let graph = self.read();
        Ok(graph
            .resolve(rev)
            .and_then(|hash| graph.commits.get(&hash))
            .map(|(_, commit)| commit.clone()))
    }

    async fn annotate(&self, tag: &Tag) -> Result<Option<Annotation>, Error> {
        Ok(self
            .read()
            .tags
            .get(tag.name())
            .and_then(|(_, annotation)| annotation.clone()))
    }

    async fn total_commits(&self) -> Result<usize, Error> {
        let graph = self.read();
        let mut all = HashSet::new();
        for tip in graph.branches.values() {
            all.extend(graph.reachable(tip));
        }
        Ok(all.len())
    }
}
