//! Value types describing repository content.
//!
//! These are plain data carriers shared by the poller, the update history
//! and the notifiers. None of them talk to a repository on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Object id of git's empty tree.
///
/// A branch cursor holding this value means "nothing has been seen yet",
/// so the next range starts at the root commit.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Length used when a hash is shown to humans.
pub const ABBREVIATED_LENGTH: usize = 8;

/// A commit hash in hexadecimal form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash(String);

impl Hash {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The empty tree sentinel, see [`EMPTY_TREE`]
    pub fn empty_tree() -> Self {
        Self(EMPTY_TREE.to_string())
    }

    pub fn is_empty_tree(&self) -> bool {
        self.0 == EMPTY_TREE
    }

    pub fn hex(&self) -> &str {
        &self.0
    }

    /// Short form used in subjects and one-line summaries
    pub fn abbreviate(&self) -> &str {
        self.0.get(..ABBREVIATED_LENGTH).unwrap_or(&self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A branch name without any `refs/heads/` prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Branch(String);

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag name without any `refs/tags/` prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name and email of a commit author, committer or tagger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Full metadata of a single commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: Hash,
    pub parents: Vec<Hash>,
    pub author: Author,
    pub committer: Author,
    pub authored: DateTime<Utc>,
    pub committed: DateTime<Utc>,
    /// Commit message split into lines, title first
    pub message: Vec<String>,
}

impl Commit {
    /// First line of the message, empty when the message is empty
    pub fn title(&self) -> &str {
        self.message.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Content of an annotated tag object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: Tag,
    /// Commit the tag points to
    pub target: Hash,
    pub author: Author,
    pub date: DateTime<Utc>,
    pub message: String,
}

/// A branch together with the commit it currently points to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub name: Branch,
    pub hash: Hash,
}

impl Reference {
    pub fn new(name: impl Into<String>, hash: Hash) -> Self {
        Self {
            name: Branch::new(name),
            hash,
        }
    }
}

/// Commits reachable from `to` but not from `from`, like `git log from..to`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitRange {
    pub from: Option<Hash>,
    pub to: Hash,
}

impl CommitRange {
    /// Range between two commits. An empty tree `from` means "from the root".
    pub fn new(from: &Hash, to: &Hash) -> Self {
        Self {
            from: (!from.is_empty_tree()).then(|| from.clone()),
            to: to.clone(),
        }
    }

    /// Everything reachable from `to`
    pub fn up_to(to: &Hash) -> Self {
        Self {
            from: None,
            to: to.clone(),
        }
    }
}

impl fmt::Display for CommitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.from {
            Some(from) => write!(f, "{}..{}", from, self.to),
            None => write!(f, "{}", self.to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviation_keeps_short_hashes() {
        let hash = Hash::new("0123456789abcdef0123456789abcdef01234567");
        assert_eq!(hash.abbreviate(), "01234567");
        assert_eq!(Hash::new("abc").abbreviate(), "abc");
    }

    #[test]
    fn empty_tree_range_starts_at_root() {
        let tip = Hash::new("feedface");
        let range = CommitRange::new(&Hash::empty_tree(), &tip);
        assert_eq!(range.from, None);
        assert_eq!(range.to_string(), "feedface");

        let range = CommitRange::new(&Hash::new("cafebabe"), &tip);
        assert_eq!(range.to_string(), "cafebabe..feedface");
    }

    #[test]
    fn title_of_empty_message() {
        let commit = Commit {
            hash: Hash::new("1"),
            parents: vec![],
            author: Author::new("duke", "duke@openjdk.org"),
            committer: Author::new("duke", "duke@openjdk.org"),
            authored: DateTime::<Utc>::default(),
            committed: DateTime::<Utc>::default(),
            message: vec![],
        };
        assert_eq!(commit.title(), "");
        assert!(!commit.is_merge());
    }
}
