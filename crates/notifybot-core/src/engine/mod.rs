//! Core notification engine
//!
//! The NotifyEngine is responsible for:
//! - Polling the repository on a fixed interval
//! - Deriving events from the update history
//! - Delivering events to every attached notifier
//! - Recording deliveries according to each notifier's idempotency
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐                      ┌───────────────┐
//! │ Repository  │──── snapshot ───┐    │ UpdateHistory │
//! └─────────────┘                 │    └───────────────┘
//!                                 ▼            ▲
//!                        ┌──────────────┐      │ reserve / commit
//!                        │ NotifyEngine │──────┘
//!                        └──────────────┘
//!                                 │
//!              ┌──────────────────┼──────────────────┐
//!              ▼                  ▼                  ▼
//!       ┌────────────┐     ┌────────────┐     ┌────────────┐
//!       │ Notifier A │     │ Notifier B │     │   Events   │
//!       └────────────┘     └────────────┘     └────────────┘
//! ```
//!
//! ## Cycle Flow
//!
//! 1. Collecting: refresh the history, fetch the repository, plan events
//! 2. Reserving: record silent bookkeeping and every delivery to a
//!    non-idempotent notifier, in one batch, before anything is sent. The
//!    batch is two ledger commits, branch cursors first. If the tag commit
//!    then fails, the cursors stay reserved and the cycle aborts, so those
//!    commits are never sent; the tags are offered again next cycle
//! 3. Dispatching: commit events, then tag events, then new branches;
//!    within a phase by subject, then by notifier order
//! 4. Committing: record successful idempotent deliveries and retry flags
//!
//! A notifier failure never stops the cycle. Errors are collected and
//! returned together once the history is committed.

use crate::config::{EngineConfig, NotifyConfig};
use crate::error::{Error, Result};
use crate::events::{Event, EventKind};
use crate::history::{HistoryUpdate, UpdateHistory, validate_updater_name};
use crate::poller::RepositoryPoller;
use crate::reconcile::{Listener, Reconciler};
use crate::traits::{Notifier, NotifierError, NotifyContext, Repository};
use crate::types::Commit;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

/// Events emitted by the NotifyEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A poll cycle began
    CycleStarted { repository: String },

    /// A notifier accepted an event
    EventDelivered {
        notifier: String,
        kind: EventKind,
        subject: String,
    },

    /// A notifier failed to handle an event
    DeliveryFailed {
        notifier: String,
        kind: EventKind,
        subject: String,
        error: String,
        /// Whether the event will be offered again
        will_retry: bool,
    },

    /// History entries were written
    HistoryCommitted { tags: usize, branches: usize },

    /// A poll cycle ended
    CycleFinished {
        delivered: usize,
        failed: usize,
        errors: usize,
    },

    /// Engine started
    Started { notifiers: usize },

    /// Engine stopped
    Stopped { reason: String },
}

/// Counters of one successful poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Events accepted by notifiers
    pub delivered: usize,
    /// Tag entries written
    pub recorded_tags: usize,
    /// Branch cursors written
    pub recorded_branches: usize,
}

/// Core notification engine
///
/// ## Lifecycle
///
/// 1. Create with [`NotifyEngine::new()`]
/// 2. Either drive cycles with [`NotifyEngine::run_one_poll_cycle()`] or
///    start the periodic loop with [`NotifyEngine::run()`]
/// 3. The loop finishes the running cycle before it honours a shutdown
pub struct NotifyEngine {
    /// Repository being watched
    repository: Box<dyn Repository>,

    /// Durable delivery record
    history: UpdateHistory,

    /// Attached notifiers, in dispatch order
    notifiers: Vec<Box<dyn Notifier>>,

    /// Branch selection
    poller: RepositoryPoller,

    /// Engine settings
    config: EngineConfig,

    /// Root of the notifier scratch directories
    scratch_dir: PathBuf,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl NotifyEngine {
    /// Create a new notification engine
    ///
    /// # Parameters
    ///
    /// - `repository`: Repository to watch
    /// - `history`: Update history shared with other instances
    /// - `notifiers`: Notifiers in dispatch order
    /// - `config`: Bot configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        repository: Box<dyn Repository>,
        history: UpdateHistory,
        notifiers: Vec<Box<dyn Notifier>>,
        config: NotifyConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        if notifiers.is_empty() {
            return Err(Error::config("No notifiers attached"));
        }
        let mut names = HashSet::new();
        for notifier in &notifiers {
            validate_updater_name(notifier.name())?;
            if !names.insert(notifier.name()) {
                return Err(Error::config(format!(
                    "Duplicate notifier name: {}",
                    notifier.name()
                )));
            }
        }

        let poller = RepositoryPoller::new(&config.branches, &config.excluded_branches)?;
        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            repository,
            history,
            notifiers,
            poller,
            scratch_dir: PathBuf::from(&config.engine.scratch_dir),
            config: config.engine,
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Repository being watched
    pub fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    /// Update history used by this engine
    pub fn history(&self) -> &UpdateHistory {
        &self.history
    }

    /// Run the engine until SIGINT
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Fatal error
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine until the shutdown channel fires or closes
    pub async fn run_with_shutdown(&self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        self.run_internal(Some(shutdown_rx)).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(EngineEvent::Started {
            notifiers: self.notifiers.len(),
        });
        info!(
            "Watching {} every {}s with {} notifier(s)",
            self.repository.name(),
            self.config.poll_interval_secs,
            self.notifiers.len()
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        let shutdown = async move {
            match shutdown_rx {
                // a dropped sender also means shutdown
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(_) = ticks.next() => {
                    match self.run_one_poll_cycle().await {
                        Ok(report) => debug!("Poll cycle finished: {:?}", report),
                        Err(e) if e.is_retriable() => warn!("Poll cycle failed: {}", e),
                        Err(e) => error!("Poll cycle failed: {}", e),
                    }
                }

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    self.emit_event(EngineEvent::Stopped {
                        reason: "Shutdown signal".to_string(),
                    });
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run one complete poll cycle
    ///
    /// # Returns
    ///
    /// - `Ok(CycleReport)`: Every event was handled
    /// - `Err(Error::CycleFailed)`: The cycle ran to the end but collected
    ///   errors; all history changes are already written
    /// - `Err(Error)`: The cycle aborted early. When the fetch or the
    ///   planning fails nothing has been written
    pub async fn run_one_poll_cycle(&self) -> Result<CycleReport> {
        self.emit_event(EngineEvent::CycleStarted {
            repository: self.repository.name().to_string(),
        });

        // Collecting
        self.history.refresh().await?;
        let snapshot = self.poller.poll(self.repository.as_ref()).await?;
        let listeners: Vec<_> = self
            .notifiers
            .iter()
            .map(|n| Listener {
                name: n.name(),
                idempotent: n.idempotent(),
                capabilities: n.capabilities(),
            })
            .collect();
        let plan = Reconciler::new(self.repository.as_ref(), &self.history, &self.config)
            .plan(&snapshot, &listeners)
            .await?;

        let mut errors = plan.errors;
        let mut report = CycleReport::default();

        // Reserving
        let mut reservation = plan.bookkeeping;
        for delivery in &plan.deliveries {
            let listener = &listeners[delivery.listener];
            if !listener.idempotent {
                delivery.bookmark.record_done(&mut reservation, listener.name)?;
            }
        }
        self.commit_history(&reservation, &mut report).await?;

        // Dispatching
        let mut outcomes = HistoryUpdate::new();
        let mut failed = 0;
        for delivery in &plan.deliveries {
            let notifier = self.notifiers[delivery.listener].as_ref();
            let event = &delivery.event;

            match self.deliver(notifier, event).await {
                Ok(()) => {
                    report.delivered += 1;
                    debug!("{} delivered {}", notifier.name(), event);
                    if let Event::NewCommits { commits, .. } = event {
                        log_latency(notifier.name(), commits);
                    }
                    if notifier.idempotent() {
                        delivery.bookmark.record_done(&mut outcomes, notifier.name())?;
                    }
                    self.emit_event(EngineEvent::EventDelivered {
                        notifier: notifier.name().to_string(),
                        kind: event.kind(),
                        subject: event.subject().to_string(),
                    });
                }
                Err(e) => {
                    failed += 1;
                    let will_retry = notifier.idempotent();
                    if will_retry {
                        warn!("{} failed to deliver {}, will retry: {}", notifier.name(), event, e);
                        delivery.bookmark.record_failure(&mut outcomes, notifier.name())?;
                        errors.push(Error::notifier(notifier.name(), e.to_string()));
                    } else {
                        error!("{} failed to deliver {}, not retrying: {}", notifier.name(), event, e);
                        errors.push(Error::non_retriable(notifier.name(), e.to_string()));
                    }
                    self.emit_event(EngineEvent::DeliveryFailed {
                        notifier: notifier.name().to_string(),
                        kind: event.kind(),
                        subject: event.subject().to_string(),
                        error: e.to_string(),
                        will_retry,
                    });
                }
            }
        }

        // Committing
        self.commit_history(&outcomes, &mut report).await?;

        self.emit_event(EngineEvent::CycleFinished {
            delivered: report.delivered,
            failed,
            errors: errors.len(),
        });

        if errors.is_empty() {
            Ok(report)
        } else {
            Err(Error::CycleFailed { errors })
        }
    }

    async fn commit_history(&self, update: &HistoryUpdate, report: &mut CycleReport) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.history.apply(update).await?;
        report.recorded_tags += update.tag_count();
        report.recorded_branches += update.branch_count();
        self.emit_event(EngineEvent::HistoryCommitted {
            tags: update.tag_count(),
            branches: update.branch_count(),
        });
        Ok(())
    }

    /// Invoke the callback matching the event
    async fn deliver(&self, notifier: &dyn Notifier, event: &Event) -> std::result::Result<(), NotifierError> {
        let scratch_dir = self.scratch_dir.join(notifier.name());
        tokio::fs::create_dir_all(&scratch_dir).await?;
        let ctx = NotifyContext {
            repository: self.repository.as_ref(),
            scratch_dir: &scratch_dir,
        };

        match event {
            Event::NewCommits { branch, commits } => {
                notifier.on_new_commits(&ctx, commits, branch).await
            }
            Event::NewTagCommit {
                commit,
                tag,
                annotation,
            } => {
                notifier
                    .on_new_tag_commit(&ctx, commit, tag, annotation.as_ref())
                    .await
            }
            Event::NewOpenJdkTagCommits {
                commits,
                tag,
                annotation,
            } => {
                notifier
                    .on_new_openjdk_tag_commits(&ctx, commits, tag, annotation.as_ref())
                    .await
            }
            Event::NewBranch {
                parent,
                branch,
                commits,
            } => notifier.on_new_branch(&ctx, commits, parent, branch).await,
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            // drop rather than block a cycle
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Time from commit to notification, per commit
fn log_latency(notifier: &str, commits: &[Commit]) {
    let now = chrono::Utc::now();
    for commit in commits {
        let latency = now.signed_duration_since(commit.committed);
        info!(
            "{} notified about {} {}s after it was committed",
            notifier,
            commit.hash.abbreviate(),
            latency.num_seconds()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryConfig;
    use crate::ledger::MemoryRefStore;
    use crate::vcs::MemoryRepository;
    use std::sync::Arc;

    struct Silent(&'static str);

    #[async_trait::async_trait]
    impl Notifier for Silent {
        fn name(&self) -> &str {
            self.0
        }
    }

    async fn history() -> UpdateHistory {
        UpdateHistory::open(Arc::new(MemoryRefStore::new()), &HistoryConfig::default())
            .await
            .unwrap()
    }

    fn config() -> NotifyConfig {
        let mut config = NotifyConfig::new("jdk", "master");
        config.engine.scratch_dir = std::env::temp_dir()
            .join("notifybot-engine-tests")
            .to_string_lossy()
            .into_owned();
        config
    }

    #[tokio::test]
    async fn rejects_missing_and_duplicate_notifiers() {
        let repo = Box::new(MemoryRepository::new("jdk"));
        assert!(NotifyEngine::new(repo.clone(), history().await, vec![], config()).is_err());

        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(Silent("a")), Box::new(Silent("a"))];
        assert!(NotifyEngine::new(repo.clone(), history().await, notifiers, config()).is_err());

        let notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(Silent("a:b"))];
        assert!(NotifyEngine::new(repo, history().await, notifiers, config()).is_err());
    }

    #[tokio::test]
    async fn emits_cycle_events() {
        let repo = MemoryRepository::new("jdk");
        repo.commit("master", "initial");
        let (engine, mut rx) = NotifyEngine::new(
            Box::new(repo),
            history().await,
            vec![Box::new(Silent("mail"))],
            config(),
        )
        .unwrap();

        let report = engine.run_one_poll_cycle().await.unwrap();
        assert_eq!(report.recorded_branches, 1);

        assert_eq!(
            rx.recv().await,
            Some(EngineEvent::CycleStarted {
                repository: "jdk".to_string()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(EngineEvent::HistoryCommitted {
                tags: 0,
                branches: 1
            })
        );
        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::CycleFinished { delivered: 0, .. })
        ));
    }

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let repo = MemoryRepository::new("jdk");
        repo.commit("master", "initial");
        let (engine, _rx) = NotifyEngine::new(
            Box::new(repo),
            history().await,
            vec![Box::new(Silent("mail"))],
            config(),
        )
        .unwrap();

        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), engine.run_with_shutdown(rx))
            .await
            .expect("engine should stop")
            .unwrap();
    }
}
