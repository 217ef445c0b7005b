//! Configuration types for the notification bot
//!
//! This module defines all configuration structures used throughout the crate.

use crate::traits::CommitIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main notification bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Repository to watch
    pub repository: RepositoryConfig,

    /// Pattern of branches to watch, matched against the whole name
    pub branches: String,

    /// Pattern of branches that are never treated as parents or tag sources
    #[serde(default = "default_excluded_branches")]
    pub excluded_branches: String,

    /// Where the update history lives
    #[serde(default)]
    pub history: HistoryConfig,

    /// Notifiers to construct through the registry
    #[serde(default)]
    pub notifiers: Vec<NotifierConfig>,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl NotifyConfig {
    /// Create a configuration watching `branches` of the named repository
    pub fn new(repository: impl Into<String>, branches: impl Into<String>) -> Self {
        Self {
            repository: RepositoryConfig::new(repository),
            branches: branches.into(),
            excluded_branches: default_excluded_branches(),
            history: HistoryConfig::default(),
            notifiers: Vec::new(),
            engine: EngineConfig::default(),
        }
    }

    /// Set the excluded branch pattern
    pub fn with_excluded_branches(mut self, pattern: impl Into<String>) -> Self {
        self.excluded_branches = pattern.into();
        self
    }

    /// Set the history configuration
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    /// Add a notifier configuration
    pub fn with_notifier(mut self, notifier: NotifierConfig) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Set the engine configuration
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.repository.name.is_empty() {
            return Err(crate::Error::config("Repository name cannot be empty"));
        }
        if self.branches.is_empty() {
            return Err(crate::Error::config("Branch pattern cannot be empty"));
        }

        self.history.validate()?;
        self.engine.validate()?;
        for notifier in &self.notifiers {
            notifier.validate()?;
        }

        Ok(())
    }
}

/// Repository location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Name used in subjects and output file names
    pub name: String,

    /// Remote URL to fetch from
    #[serde(default)]
    pub url: String,

    /// Local mirror directory
    #[serde(default)]
    pub local_path: String,
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: String::new(),
            local_path: String::new(),
        }
    }

    /// Set the remote URL and the local mirror directory
    pub fn with_remote(mut self, url: impl Into<String>, local_path: impl Into<String>) -> Self {
        self.url = url.into();
        self.local_path = local_path.into();
        self
    }
}

/// Update history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Backend holding the ledger references
    #[serde(default)]
    pub store: HistoryStoreConfig,

    /// Ledger of delivered tags
    #[serde(default = "default_tag_ledger")]
    pub tags: LedgerConfig,

    /// Ledger of branch cursors
    #[serde(default = "default_branch_ledger")]
    pub branches: LedgerConfig,

    /// Identity recorded on ledger commits
    #[serde(default)]
    pub identity: CommitIdentity,

    /// Push attempts before a ledger write gives up
    #[serde(default = "default_max_push_attempts")]
    pub max_push_attempts: usize,
}

impl HistoryConfig {
    /// Set the backend
    pub fn with_store(mut self, store: HistoryStoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Set the number of push attempts
    pub fn with_max_push_attempts(mut self, attempts: usize) -> Self {
        self.max_push_attempts = attempts;
        self
    }

    /// Validate the history configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_push_attempts == 0 {
            return Err(crate::Error::config("History push attempts must be > 0"));
        }
        self.tags.validate()?;
        self.branches.validate()?;
        if self.tags.reference == self.branches.reference && self.tags.file == self.branches.file {
            return Err(crate::Error::config(
                "Tag and branch ledgers cannot share the same file",
            ));
        }
        self.store.validate()
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            store: HistoryStoreConfig::default(),
            tags: default_tag_ledger(),
            branches: default_branch_ledger(),
            identity: CommitIdentity::default(),
            max_push_attempts: default_max_push_attempts(),
        }
    }
}

/// Location of one ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Reference holding the ledger commits
    pub reference: String,
    /// File inside the reference
    pub file: String,
    /// Commit message for updates
    pub message: String,
}

impl LedgerConfig {
    pub fn new(
        reference: impl Into<String>,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            file: file.into(),
            message: message.into(),
        }
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.reference.is_empty() || self.file.is_empty() {
            return Err(crate::Error::config(
                "Ledger reference and file cannot be empty",
            ));
        }
        Ok(())
    }
}

/// Backend of the history references
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryStoreConfig {
    /// Branches of a remote git repository
    Git {
        /// Remote URL holding the history references
        url: String,
        /// Local scratch clone used to build ledger commits
        local_path: String,
    },

    /// Local JSON file (single host only)
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl HistoryStoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            HistoryStoreConfig::Git { url, local_path } => {
                if url.is_empty() {
                    return Err(crate::Error::config("History repository URL cannot be empty"));
                }
                if local_path.is_empty() {
                    return Err(crate::Error::config("History clone path cannot be empty"));
                }
                Ok(())
            }
            HistoryStoreConfig::File { path } => {
                if path.is_empty() {
                    return Err(crate::Error::config("History file path cannot be empty"));
                }
                Ok(())
            }
            HistoryStoreConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom store factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom store config cannot be null"));
                }
                Ok(())
            }
            HistoryStoreConfig::Memory => Ok(()),
        }
    }

    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            HistoryStoreConfig::Git { .. } => "git",
            HistoryStoreConfig::File { .. } => "file",
            HistoryStoreConfig::Memory => "memory",
            HistoryStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierConfig {
    /// Append commit and tag records to a JSON feed file
    Json {
        /// Notifier name, also its history key
        #[serde(default = "default_json_name")]
        name: String,
        /// Directory holding `<repository>.json`
        directory: String,
        /// Release version written into every record
        version: String,
        /// Build written into commit records
        #[serde(default = "default_build")]
        default_build: String,
        /// Template for commit links, `{hash}` is replaced
        #[serde(default)]
        commit_url: Option<String>,
    },

    /// Post commits to a Slack incoming webhook
    Slack {
        /// Notifier name, also its history key
        #[serde(default = "default_slack_name")]
        name: String,
        /// Incoming webhook URL
        webhook_url: String,
        /// Display name of the poster
        #[serde(default)]
        username: Option<String>,
        /// Template for commit links, `{hash}` is replaced
        #[serde(default)]
        commit_url: Option<String>,
    },

    /// Custom notifier
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl NotifierConfig {
    /// Validate the notifier configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            NotifierConfig::Json {
                name,
                directory,
                version,
                ..
            } => {
                crate::history::validate_updater_name(name)?;
                if directory.is_empty() {
                    return Err(crate::Error::config("JSON notifier directory cannot be empty"));
                }
                if version.is_empty() {
                    return Err(crate::Error::config("JSON notifier version cannot be empty"));
                }
                Ok(())
            }
            NotifierConfig::Slack {
                name, webhook_url, ..
            } => {
                crate::history::validate_updater_name(name)?;
                if webhook_url.is_empty() {
                    return Err(crate::Error::config("Slack webhook URL cannot be empty"));
                }
                Ok(())
            }
            NotifierConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom notifier factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom notifier config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the notifier type name
    pub fn type_name(&self) -> &str {
        match self {
            NotifierConfig::Json { .. } => "json",
            NotifierConfig::Slack { .. } => "slack",
            NotifierConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between two poll cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Root of the per-notifier scratch directories
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,

    /// Largest commit range delivered as one event
    ///
    /// Larger ranges move the cursor to the tip without a notification and
    /// report an error.
    #[serde(default = "default_max_new_commits")]
    pub max_new_commits: usize,

    /// Largest number of new tags handled in one cycle
    ///
    /// Larger batches are recorded without notifications and reported as
    /// an error.
    #[serde(default = "default_max_new_tags")]
    pub max_new_tags: usize,

    /// Repositories with at most this many commits announce their whole
    /// history on the first poll
    ///
    /// Set to 0 to always start from the current tips.
    #[serde(default)]
    pub new_repository_commit_threshold: usize,

    /// Capacity of the internal event channel
    ///
    /// When full, engine events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Additional metadata to attach to operations
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.max_new_commits == 0 || self.max_new_tags == 0 {
            return Err(crate::Error::config("Event thresholds must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            scratch_dir: default_scratch_dir(),
            max_new_commits: default_max_new_commits(),
            max_new_tags: default_max_new_tags(),
            new_repository_commit_threshold: 0,
            event_channel_capacity: default_event_channel_capacity(),
            metadata: HashMap::new(),
        }
    }
}

fn default_excluded_branches() -> String {
    "pr/.*".to_string()
}

fn default_tag_ledger() -> LedgerConfig {
    LedgerConfig::new("history", "tags.txt", "Updated tags")
}

fn default_branch_ledger() -> LedgerConfig {
    LedgerConfig::new("history", "branches.txt", "Updated branches")
}

fn default_max_push_attempts() -> usize {
    10
}

fn default_json_name() -> String {
    "json".to_string()
}

fn default_slack_name() -> String {
    "slack".to_string()
}

fn default_build() -> String {
    "team".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_scratch_dir() -> String {
    std::env::temp_dir()
        .join("notifybot")
        .to_string_lossy()
        .into_owned()
}

fn default_max_new_commits() -> usize {
    1000
}

fn default_max_new_tags() -> usize {
    10
}

fn default_event_channel_capacity() -> usize {
    1000
}
