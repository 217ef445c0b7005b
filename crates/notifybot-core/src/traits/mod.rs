//! Core traits for the notification bot
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`Repository`]: Read access to the watched repository
//! - [`RefStore`]: Compare-and-swap file storage on a named reference
//! - [`Notifier`]: Delivery of change events to an outside system

pub mod notifier;
pub mod ref_store;
pub mod repository;

pub use notifier::{Capabilities, Notifier, NotifierError, NotifierFactory, NotifyContext};
pub use ref_store::{CommitIdentity, RefStore, RefStoreFactory, StoredFile, WriteOutcome, WriteRequest};
pub use repository::Repository;
