// # notifybot-core
//
// Core library of the repository change notification bot.
//
// ## Architecture Overview
//
// This library watches a repository and tells interested parties about
// new commits, tags and branches:
// - **Repository**: Trait for reading branches, tags and commit ranges
// - **RefStore**: Trait for compare-and-swap storage on a reference
// - **Ledger**: Optimistic-concurrency key/value table on a RefStore
// - **UpdateHistory**: Per-notifier tag flags and branch cursors
// - **Notifier**: Trait for delivering events to the outside world
// - **NotifyEngine**: Poll, reconcile, dispatch and record, once per cycle
// - **NotifierRegistry**: Plugin-based registry for notifiers and stores
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from implementations
// 2. **Shared State**: Several instances may share one history safely
// 3. **Plugin-Based**: Notifiers are registered dynamically
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Delivery Semantics**: Idempotent notifiers get at-least-once
//    delivery, all others at-most-once

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod format;
pub mod history;
pub mod ledger;
pub mod poller;
pub mod reconcile;
pub mod registry;
pub mod tag;
pub mod traits;
pub mod types;
pub mod vcs;

// Re-export core types for convenience
pub use config::{EngineConfig, HistoryConfig, HistoryStoreConfig, NotifierConfig, NotifyConfig};
pub use engine::{CycleReport, EngineEvent, NotifyEngine};
pub use error::{Error, Result};
pub use events::{Event, EventKind};
pub use history::{HistoryUpdate, TagStatus, UpdateHistory};
pub use ledger::{FileRefStore, Ledger, LedgerEntries, LedgerLocation, MemoryRefStore};
pub use registry::NotifierRegistry;
pub use tag::OpenJdkTag;
pub use traits::{Capabilities, Notifier, NotifierError, NotifyContext, RefStore, Repository};
pub use types::{Annotation, Author, Branch, Commit, CommitRange, Hash, Reference, Tag};
pub use vcs::MemoryRepository;
