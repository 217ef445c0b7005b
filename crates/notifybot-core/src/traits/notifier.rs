// # Notifier Trait
//
// Defines the interface for delivering repository events to the outside
// world: mailing lists, chat channels, issue trackers, JSON feeds.
//
// ## Delivery semantics
//
// Every notifier declares whether it is idempotent.
//
// - Idempotent notifiers may see the same event more than once. The engine
//   only records an event as handled after the callback succeeds, so a
//   failed delivery is offered again on the next cycle.
// - Non-idempotent notifiers see an event at most once. The engine records
//   the event before invoking the callback; a failure is reported and the
//   event is not offered again.
//
// All callbacks have empty default bodies so a notifier only implements
// the events it cares about.

use crate::config::NotifierConfig;
use crate::tag::OpenJdkTag;
use crate::traits::Repository;
use crate::types::{Annotation, Branch, Commit, Tag};
use async_trait::async_trait;
use std::ops::BitOr;
use std::path::Path;
use thiserror::Error;

/// Everything a notifier may need besides the event itself
#[derive(Clone, Copy)]
pub struct NotifyContext<'a> {
    /// The repository the event came from
    pub repository: &'a dyn Repository,
    /// Private working directory of this notifier, already created
    pub scratch_dir: &'a Path,
}

/// Set of event kinds a notifier wants to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const COMMITS: Self = Self(1);
    pub const TAGS: Self = Self(1 << 1);
    pub const BRANCHES: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Failure reported by a notifier callback
#[derive(Debug, Error)]
pub enum NotifierError {
    /// The receiving system refused or could not be reached
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Local file or process error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NotifierError {
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }
}

/// Trait for notifier implementations
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Unique name of this notifier
    ///
    /// The name keys this notifier's entries in the update history, so it
    /// must stay stable across restarts and may not contain whitespace or `:`.
    fn name(&self) -> &str;

    /// Whether repeated delivery of the same event is harmless
    fn idempotent(&self) -> bool {
        false
    }

    /// Event kinds this notifier handles
    ///
    /// Events of other kinds are recorded as handled without a callback.
    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    /// New commits on an already known branch, oldest first
    async fn on_new_commits(
        &self,
        _ctx: &NotifyContext<'_>,
        _commits: &[Commit],
        _branch: &Branch,
    ) -> Result<(), NotifierError> {
        Ok(())
    }

    /// A new tag that does not follow the build-numbered convention
    async fn on_new_tag_commit(
        &self,
        _ctx: &NotifyContext<'_>,
        _commit: &Commit,
        _tag: &Tag,
        _annotation: Option<&Annotation>,
    ) -> Result<(), NotifierError> {
        Ok(())
    }

    /// A new build-numbered tag with the commits since the previous build
    async fn on_new_openjdk_tag_commits(
        &self,
        _ctx: &NotifyContext<'_>,
        _commits: &[Commit],
        _tag: &OpenJdkTag,
        _annotation: Option<&Annotation>,
    ) -> Result<(), NotifierError> {
        Ok(())
    }

    /// A branch appeared; `commits` are those not on `parent`
    async fn on_new_branch(
        &self,
        _ctx: &NotifyContext<'_>,
        _commits: &[Commit],
        _parent: &Branch,
        _branch: &Branch,
    ) -> Result<(), NotifierError> {
        Ok(())
    }
}

/// Helper trait for constructing notifiers from configuration
pub trait NotifierFactory: Send + Sync {
    /// Create a Notifier instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Configuration of this notifier
    ///
    /// # Returns
    ///
    /// A boxed Notifier trait object
    fn create(&self, config: &NotifierConfig) -> Result<Box<dyn Notifier>, crate::Error>;
}
