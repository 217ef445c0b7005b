//! Test doubles and common utilities for contract tests
//!
//! This module provides a recording notifier whose behaviour the test
//! controls through a shared probe, and a fixture bundling an in-memory
//! repository with an in-memory history store.

#![allow(dead_code)]

use notifybot_core::config::NotifyConfig;
use notifybot_core::engine::{EngineEvent, NotifyEngine};
use notifybot_core::history::UpdateHistory;
use notifybot_core::ledger::MemoryRefStore;
use notifybot_core::tag::OpenJdkTag;
use notifybot_core::traits::{Capabilities, Notifier, NotifierError, NotifyContext};
use notifybot_core::types::{Annotation, Branch, Commit, Tag};
use notifybot_core::vcs::MemoryRepository;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// One successful callback, reduced to what tests assert on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Commits {
        branch: String,
        titles: Vec<String>,
    },
    Tag {
        tag: String,
        title: String,
        tagger: Option<String>,
    },
    OpenJdkTag {
        tag: String,
        titles: Vec<String>,
    },
    Branch {
        parent: String,
        branch: String,
        titles: Vec<String>,
    },
}

impl Call {
    pub fn commits(branch: &str, titles: &[&str]) -> Self {
        Call::Commits {
            branch: branch.to_string(),
            titles: titles.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn openjdk_tag(tag: &str, titles: &[&str]) -> Self {
        Call::OpenJdkTag {
            tag: tag.to_string(),
            titles: titles.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn branch(parent: &str, branch: &str, titles: &[&str]) -> Self {
        Call::Branch {
            parent: parent.to_string(),
            branch: branch.to_string(),
            titles: titles.iter().map(|t| t.to_string()).collect(),
        }
    }
}

fn titles(commits: &[Commit]) -> Vec<String> {
    commits.iter().map(|c| c.title().to_string()).collect()
}

/// Shared view into a RecordingNotifier after it moved into an engine
#[derive(Clone, Default)]
pub struct Probe {
    calls: Arc<Mutex<Vec<Call>>>,
    failing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl Probe {
    /// Successful callbacks so far
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Successful callbacks since the last call, clearing the record
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Make every callback fail until switched off
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Callback invocations, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) -> Result<(), NotifierError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifierError::delivery("simulated outage"));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

/// A notifier that records every callback
pub struct RecordingNotifier {
    name: String,
    idempotent: bool,
    capabilities: Capabilities,
    probe: Probe,
}

impl RecordingNotifier {
    /// A non-idempotent notifier handling every event kind
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            idempotent: false,
            capabilities: Capabilities::ALL,
            probe: Probe::default(),
        }
    }

    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn idempotent(&self) -> bool {
        self.idempotent
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn on_new_commits(
        &self,
        _ctx: &NotifyContext<'_>,
        commits: &[Commit],
        branch: &Branch,
    ) -> Result<(), NotifierError> {
        self.probe.record(Call::Commits {
            branch: branch.name().to_string(),
            titles: titles(commits),
        })
    }

    async fn on_new_tag_commit(
        &self,
        _ctx: &NotifyContext<'_>,
        commit: &Commit,
        tag: &Tag,
        annotation: Option<&Annotation>,
    ) -> Result<(), NotifierError> {
        self.probe.record(Call::Tag {
            tag: tag.name().to_string(),
            title: commit.title().to_string(),
            tagger: annotation.map(|a| a.author.name.clone()),
        })
    }

    async fn on_new_openjdk_tag_commits(
        &self,
        _ctx: &NotifyContext<'_>,
        commits: &[Commit],
        tag: &OpenJdkTag,
        _annotation: Option<&Annotation>,
    ) -> Result<(), NotifierError> {
        self.probe.record(Call::OpenJdkTag {
            tag: tag.tag().name().to_string(),
            titles: titles(commits),
        })
    }

    async fn on_new_branch(
        &self,
        _ctx: &NotifyContext<'_>,
        commits: &[Commit],
        parent: &Branch,
        branch: &Branch,
    ) -> Result<(), NotifierError> {
        self.probe.record(Call::Branch {
            parent: parent.name().to_string(),
            branch: branch.name().to_string(),
            titles: titles(commits),
        })
    }
}

/// Repository, history store and scratch space for one test
pub struct Fixture {
    pub repo: MemoryRepository,
    pub store: MemoryRefStore,
    scratch: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            repo: MemoryRepository::new("jdk"),
            store: MemoryRefStore::new(),
            scratch: TempDir::new().expect("scratch directory"),
        }
    }

    /// Watches `master` and `jdkNN` branches
    pub fn config(&self) -> NotifyConfig {
        let mut config = NotifyConfig::new("jdk", "master|jdk[0-9]+");
        config.engine.scratch_dir = self.scratch.path().to_string_lossy().into_owned();
        config.engine.poll_interval_secs = 1;
        config
    }

    /// A fresh history instance on the shared store
    pub async fn history(&self) -> UpdateHistory {
        UpdateHistory::open(Arc::new(self.store.clone()), &self.config().history)
            .await
            .expect("history opens")
    }

    pub async fn engine(
        &self,
        notifiers: Vec<Box<dyn Notifier>>,
    ) -> (NotifyEngine, mpsc::Receiver<EngineEvent>) {
        self.engine_with_config(notifiers, self.config()).await
    }

    pub async fn engine_with_config(
        &self,
        notifiers: Vec<Box<dyn Notifier>>,
        config: NotifyConfig,
    ) -> (NotifyEngine, mpsc::Receiver<EngineEvent>) {
        NotifyEngine::new(Box::new(self.repo.clone()), self.history().await, notifiers, config)
            .expect("engine construction succeeds")
    }
}

/// Drain every event currently queued
pub fn drain(rx: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
