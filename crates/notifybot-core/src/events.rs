//! Change events offered to notifiers.

use crate::tag::OpenJdkTag;
use crate::traits::Capabilities;
use crate::types::{Annotation, Author, Branch, Commit, Tag};
use std::fmt;

/// Kind of a change event, used for capability filtering and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Commits,
    Tag,
    Branch,
}

impl EventKind {
    /// Capability a notifier needs to receive events of this kind
    pub fn capability(self) -> Capabilities {
        match self {
            EventKind::Commits => Capabilities::COMMITS,
            EventKind::Tag => Capabilities::TAGS,
            EventKind::Branch => Capabilities::BRANCHES,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Commits => "commits",
            EventKind::Tag => "tag",
            EventKind::Branch => "branch",
        })
    }
}

/// A change detected in the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Commits added to a known branch, oldest first
    NewCommits { branch: Branch, commits: Vec<Commit> },

    /// A tag outside the build-numbered convention
    NewTagCommit {
        commit: Commit,
        tag: Tag,
        annotation: Option<Annotation>,
    },

    /// A build-numbered tag with every commit since the previous build
    NewOpenJdkTagCommits {
        commits: Vec<Commit>,
        tag: OpenJdkTag,
        annotation: Option<Annotation>,
    },

    /// A branch that was not seen before, with its commits not on `parent`
    NewBranch {
        parent: Branch,
        branch: Branch,
        commits: Vec<Commit>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::NewCommits { .. } => EventKind::Commits,
            Event::NewTagCommit { .. } | Event::NewOpenJdkTagCommits { .. } => EventKind::Tag,
            Event::NewBranch { .. } => EventKind::Branch,
        }
    }

    /// Commits carried by the event
    pub fn commits(&self) -> &[Commit] {
        match self {
            Event::NewCommits { commits, .. }
            | Event::NewOpenJdkTagCommits { commits, .. }
            | Event::NewBranch { commits, .. } => commits,
            Event::NewTagCommit { commit, .. } => std::slice::from_ref(commit),
        }
    }

    /// Branch or tag name the event is about
    pub fn subject(&self) -> &str {
        match self {
            Event::NewCommits { branch, .. } | Event::NewBranch { branch, .. } => branch.name(),
            Event::NewTagCommit { tag, .. } => tag.name(),
            Event::NewOpenJdkTagCommits { tag, .. } => tag.tag().name(),
        }
    }

    /// Person credited with the change
    ///
    /// Tag events credit the tagger when the tag is annotated. Other events
    /// credit the committer of the newest commit.
    pub fn author(&self) -> Option<&Author> {
        let annotation = match self {
            Event::NewTagCommit { annotation, .. }
            | Event::NewOpenJdkTagCommits { annotation, .. } => annotation.as_ref(),
            _ => None,
        };
        annotation
            .map(|a| &a.author)
            .or_else(|| self.commits().last().map(|c| &c.committer))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} commit(s))",
            self.kind(),
            self.subject(),
            self.commits().len()
        )
    }
}
