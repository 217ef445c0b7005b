//! Event derivation.
//!
//! Compares a [`RepositorySnapshot`] with the update history and works out,
//! for every notifier, which events are due and which history entries go
//! with them. Nothing is written here; the engine decides when each entry
//! is recorded depending on the notifier's idempotency.
//!
//! Three kinds of history changes come out of a plan:
//!
//! - a [`Bookmark`] attached to each delivery, recorded once the event is
//!   considered handled;
//! - silent bookkeeping, recorded in any case: first-poll cursors, events
//!   a notifier has no capability for, oversized ranges and tag batches;
//! - errors for conditions an operator should hear about.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::history::{HistoryUpdate, TagStatus, UpdateHistory};
use crate::poller::RepositorySnapshot;
use crate::tag::OpenJdkTag;
use crate::traits::{Capabilities, Repository};
use crate::types::{Branch, CommitRange, Hash, Reference, Tag};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// What the planner needs to know about a notifier
#[derive(Debug, Clone, Copy)]
pub struct Listener<'a> {
    pub name: &'a str,
    pub idempotent: bool,
    pub capabilities: Capabilities,
}

/// History entry that marks an event as handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bookmark {
    /// Move the branch cursor to `hash`
    Branch { branch: Branch, hash: Hash },
    /// Mark the tag as done
    Tag(Tag),
}

impl Bookmark {
    /// Record the event as handled
    pub fn record_done(&self, update: &mut HistoryUpdate, listener: &str) -> Result<()> {
        match self {
            Bookmark::Branch { branch, hash } => update.set_branch(branch, listener, hash),
            Bookmark::Tag(tag) => update.mark_tag(tag, listener, TagStatus::Done),
        }
    }

    /// Record a failed idempotent delivery so it is offered again
    ///
    /// Branch cursors simply stay where they are. Tags need an explicit
    /// flag because a tag without any entry is treated as never seen.
    pub fn record_failure(&self, update: &mut HistoryUpdate, listener: &str) -> Result<()> {
        match self {
            Bookmark::Branch { .. } => Ok(()),
            Bookmark::Tag(tag) => update.mark_tag(tag, listener, TagStatus::NeedsRetry),
        }
    }
}

/// Dispatch phase: all commit events go first, then tags, then new branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Commits,
    Tags,
    Branches,
}

// (phase, subject class, subject rank, subject name, listener index)
type OrderKey = (Phase, u8, u64, String, usize);

/// One event for one notifier
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Index of the notifier in the engine's list
    pub listener: usize,
    pub event: Event,
    pub bookmark: Bookmark,
    order: OrderKey,
}

impl Delivery {
    pub fn phase(&self) -> Phase {
        self.order.0
    }
}

/// Outcome of planning one poll cycle
#[derive(Debug, Default)]
pub struct CyclePlan {
    /// Deliveries in dispatch order
    pub deliveries: Vec<Delivery>,
    /// Entries recorded regardless of delivery outcome
    pub bookkeeping: HistoryUpdate,
    /// Conditions to report at the end of the cycle
    pub errors: Vec<Error>,
}

#[derive(Debug, Clone)]
enum TagPlan {
    /// Not reachable from a watched branch yet
    Deferred,
    /// Recorded without an event
    Silent,
    /// The tag could not be read; nothing is recorded
    Broken,
    Deliver(Event),
}

/// Derives events from a snapshot and the update history
pub struct Reconciler<'a> {
    repository: &'a dyn Repository,
    history: &'a UpdateHistory,
    config: &'a EngineConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        repository: &'a dyn Repository,
        history: &'a UpdateHistory,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            repository,
            history,
            config,
        }
    }

    /// Plan the deliveries of one cycle
    ///
    /// # Returns
    ///
    /// - `Ok(CyclePlan)`: Deliveries, bookkeeping and reportable conditions
    /// - `Err(Error)`: A repository or history query failed
    pub async fn plan(
        &self,
        snapshot: &RepositorySnapshot,
        listeners: &[Listener<'_>],
    ) -> Result<CyclePlan> {
        let mut plan = CyclePlan::default();

        self.plan_branches(snapshot, listeners, &mut plan).await?;
        self.plan_tags(snapshot, listeners, &mut plan).await?;

        plan.deliveries.sort_by(|a, b| a.order.cmp(&b.order));
        debug!(
            "Planned {} deliveries, {} tag and {} branch bookkeeping entries",
            plan.deliveries.len(),
            plan.bookkeeping.tag_count(),
            plan.bookkeeping.branch_count()
        );
        Ok(plan)
    }

    async fn plan_branches(
        &self,
        snapshot: &RepositorySnapshot,
        listeners: &[Listener<'_>],
        plan: &mut CyclePlan,
    ) -> Result<()> {
        // cursors[listener][branch rank]
        let mut cursors = Vec::with_capacity(listeners.len());
        let mut seed = None;
        for listener in listeners {
            let mut known = Vec::with_capacity(snapshot.watched.len());
            for reference in &snapshot.watched {
                known.push(self.history.branch_hash(&reference.name, listener.name).await?);
            }

            if !known.is_empty() && known.iter().all(Option::is_none) {
                if seed.is_none() {
                    seed = Some(self.initial_cursor().await?);
                }
                let start = seed.clone().flatten();
                for (cursor, reference) in known.iter_mut().zip(&snapshot.watched) {
                    let hash = start.clone().unwrap_or_else(|| reference.hash.clone());
                    plan.bookkeeping.set_branch(&reference.name, listener.name, &hash)?;
                    *cursor = Some(hash);
                }
                info!(
                    "First poll of {} for {}: initialized cursors of {} branches",
                    self.repository.name(),
                    listener.name,
                    known.len()
                );
            }
            cursors.push(known);
        }

        let mut parents: HashMap<Branch, Option<(Reference, usize)>> = HashMap::new();

        for (rank, reference) in snapshot.watched.iter().enumerate() {
            for (index, listener) in listeners.iter().enumerate() {
                match cursors[index][rank].clone() {
                    Some(last) => {
                        let order = (Phase::Commits, 0, rank as u64, String::new(), index);
                        self.plan_new_commits(reference, &last, index, listener, order, plan)
                            .await?;
                    }
                    None => {
                        if !parents.contains_key(&reference.name) {
                            let parent = self.find_parent(snapshot, reference).await?;
                            parents.insert(reference.name.clone(), parent);
                        }
                        let parent = parents.get(&reference.name).cloned().flatten();
                        let order = (Phase::Branches, 0, rank as u64, String::new(), index);
                        self.plan_new_branch(reference, parent, index, listener, order, plan)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Cursor for a repository seen for the first time
    ///
    /// `Some(empty tree)` announces the whole history of small repositories,
    /// `None` starts every branch at its current tip.
    async fn initial_cursor(&self) -> Result<Option<Hash>> {
        let threshold = self.config.new_repository_commit_threshold;
        if threshold == 0 {
            return Ok(None);
        }
        let total = self.repository.total_commits().await?;
        Ok((total <= threshold).then(Hash::empty_tree))
    }

    async fn plan_new_commits(
        &self,
        reference: &Reference,
        last: &Hash,
        index: usize,
        listener: &Listener<'_>,
        order: OrderKey,
        plan: &mut CyclePlan,
    ) -> Result<()> {
        if *last == reference.hash {
            return Ok(());
        }

        let tip = Bookmark::Branch {
            branch: reference.name.clone(),
            hash: reference.hash.clone(),
        };

        if !last.is_empty_tree() && self.repository.lookup(last.hex()).await?.is_none() {
            warn!(
                "Cursor {} of {} for {} no longer exists, restarting at {}",
                last.abbreviate(),
                listener.name,
                reference.name,
                reference.hash.abbreviate()
            );
            return tip.record_done(&mut plan.bookkeeping, listener.name);
        }

        let range = CommitRange::new(last, &reference.hash);
        let count = self.repository.commit_count(&range).await?;
        if count == 0 {
            // rewound; the cursor keeps the newer commit
            debug!(
                "{} rewound to {}, keeping the cursor of {} at {}",
                reference.name,
                reference.hash.abbreviate(),
                listener.name,
                last.abbreviate()
            );
            return Ok(());
        }
        if count > self.config.max_new_commits {
            tip.record_done(&mut plan.bookkeeping, listener.name)?;
            plan.errors.push(Error::excessive(format!(
                "{} new commits on {} for {} (limit {}), skipped to {}",
                count,
                reference.name,
                listener.name,
                self.config.max_new_commits,
                reference.hash.abbreviate()
            )));
            return Ok(());
        }

        let commits = self.repository.commits(&range).await?;
        let event = Event::NewCommits {
            branch: reference.name.clone(),
            commits,
        };
        offer(plan, index, listener, event, tip, order)
    }

    /// Closest non-excluded branch, by number of commits unique to `reference`
    ///
    /// Ties prefer watched branches, then the smaller name.
    async fn find_parent(
        &self,
        snapshot: &RepositorySnapshot,
        reference: &Reference,
    ) -> Result<Option<(Reference, usize)>> {
        let mut best: Option<((usize, bool, Branch), &Reference)> = None;
        for candidate in snapshot.candidates.iter().filter(|c| c.name != reference.name) {
            let count = self
                .repository
                .commit_count(&CommitRange::new(&candidate.hash, &reference.hash))
                .await?;
            let key = (count, !snapshot.is_watched(candidate), candidate.name.clone());
            if best.as_ref().is_none_or(|(best_key, _)| key < *best_key) {
                best = Some((key, candidate));
            }
        }
        Ok(best.map(|((count, _, _), parent)| (parent.clone(), count)))
    }

    async fn plan_new_branch(
        &self,
        reference: &Reference,
        parent: Option<(Reference, usize)>,
        index: usize,
        listener: &Listener<'_>,
        order: OrderKey,
        plan: &mut CyclePlan,
    ) -> Result<()> {
        let tip = Bookmark::Branch {
            branch: reference.name.clone(),
            hash: reference.hash.clone(),
        };

        let Some((parent, count)) = parent else {
            warn!(
                "No parent candidate for new branch {}, starting {} at its tip",
                reference.name, listener.name
            );
            return tip.record_done(&mut plan.bookkeeping, listener.name);
        };

        if count > self.config.max_new_commits {
            tip.record_done(&mut plan.bookkeeping, listener.name)?;
            plan.errors.push(Error::excessive(format!(
                "New branch {} has {} commits not on {} (limit {})",
                reference.name, count, parent.name, self.config.max_new_commits
            )));
            return Ok(());
        }

        let commits = self
            .repository
            .commits(&CommitRange::new(&parent.hash, &reference.hash))
            .await?;
        let event = Event::NewBranch {
            parent: parent.name,
            branch: reference.name.clone(),
            commits,
        };
        offer(plan, index, listener, event, tip, order)
    }

    async fn plan_tags(
        &self,
        snapshot: &RepositorySnapshot,
        listeners: &[Listener<'_>],
        plan: &mut CyclePlan,
    ) -> Result<()> {
        if snapshot.tags.is_empty() {
            return Ok(());
        }
        let known: HashSet<&str> = snapshot.tags.iter().map(Tag::name).collect();
        let mut tag_plans: HashMap<Tag, TagPlan> = HashMap::new();

        for (index, listener) in listeners.iter().enumerate() {
            let mut unseen = 0;
            let mut new_tags = Vec::new();
            for tag in &snapshot.tags {
                match self.history.tag_status(tag, listener.name).await? {
                    None => {
                        unseen += 1;
                        new_tags.push(tag);
                    }
                    Some(TagStatus::NeedsRetry) => new_tags.push(tag),
                    Some(TagStatus::Done) => {}
                }
            }

            if new_tags.is_empty() {
                continue;
            }
            if unseen == snapshot.tags.len() {
                info!(
                    "First tag poll for {}: recording {} existing tags",
                    listener.name, unseen
                );
                for tag in new_tags {
                    plan.bookkeeping.mark_tag(tag, listener.name, TagStatus::Done)?;
                }
                continue;
            }
            if new_tags.len() > self.config.max_new_tags {
                plan.errors.push(Error::excessive(format!(
                    "{} new tags for {} (limit {}), recorded without notifications",
                    new_tags.len(),
                    listener.name,
                    self.config.max_new_tags
                )));
                for tag in new_tags {
                    plan.bookkeeping.mark_tag(tag, listener.name, TagStatus::Done)?;
                }
                continue;
            }

            for tag in new_tags {
                if !tag_plans.contains_key(tag) {
                    let tag_plan = self.plan_tag(snapshot, &known, tag, plan).await?;
                    tag_plans.insert(tag.clone(), tag_plan);
                }
                let bookmark = Bookmark::Tag(tag.clone());
                match tag_plans.get(tag) {
                    Some(TagPlan::Deliver(event)) => {
                        let order = tag_order(event, index);
                        offer(plan, index, listener, event.clone(), bookmark, order)?;
                    }
                    Some(TagPlan::Silent) => {
                        bookmark.record_done(&mut plan.bookkeeping, listener.name)?;
                    }
                    Some(TagPlan::Deferred) | Some(TagPlan::Broken) | None => {}
                }
            }
        }
        Ok(())
    }

    async fn plan_tag(
        &self,
        snapshot: &RepositorySnapshot,
        known: &HashSet<&str>,
        tag: &Tag,
        plan: &mut CyclePlan,
    ) -> Result<TagPlan> {
        let Some(target) = self.repository.resolve(tag.name()).await? else {
            plan.errors.push(Error::vcs(format!("Failed to resolve tag '{tag}'")));
            return Ok(TagPlan::Broken);
        };

        let mut reachable = false;
        for branch in &snapshot.watched {
            if self.repository.is_ancestor(&target, &branch.hash).await? {
                reachable = true;
                break;
            }
        }
        if !reachable {
            debug!("Tag {} is not on a watched branch yet, deferring", tag);
            return Ok(TagPlan::Deferred);
        }

        let annotation = self.repository.annotate(tag).await?;

        if let Some(jdk) = OpenJdkTag::create(tag) {
            if jdk.build_num().is_none() {
                // `-ga` tags carry just the tagged commit
                let Some(commit) = self.repository.lookup(target.hex()).await? else {
                    plan.errors.push(Error::vcs(format!("Failed to look up tag '{tag}'")));
                    return Ok(TagPlan::Broken);
                };
                return Ok(TagPlan::Deliver(Event::NewOpenJdkTagCommits {
                    commits: vec![commit],
                    tag: jdk,
                    annotation,
                }));
            }
            let Some(previous) = previous_existing(&jdk, known) else {
                debug!("Tag {} has no earlier build, recording silently", tag);
                return Ok(TagPlan::Silent);
            };
            let Some(previous_hash) = self.repository.resolve(previous.tag().name()).await? else {
                plan.errors.push(Error::vcs(format!(
                    "Failed to resolve tag '{}'",
                    previous.tag()
                )));
                return Ok(TagPlan::Broken);
            };

            let mut commits = self
                .repository
                .commits(&CommitRange::new(&previous_hash, &target))
                .await?;
            if commits.is_empty() {
                // same commit as the previous build
                commits.extend(self.repository.lookup(target.hex()).await?);
            }
            return Ok(TagPlan::Deliver(Event::NewOpenJdkTagCommits {
                commits,
                tag: jdk,
                annotation,
            }));
        }

        match self.repository.lookup(target.hex()).await? {
            Some(commit) => Ok(TagPlan::Deliver(Event::NewTagCommit {
                commit,
                tag: tag.clone(),
                annotation,
            })),
            None => {
                plan.errors.push(Error::vcs(format!("Failed to look up tag '{tag}'")));
                Ok(TagPlan::Broken)
            }
        }
    }
}

/// Nearest earlier build of the same version that exists in the repository
fn previous_existing(tag: &OpenJdkTag, known: &HashSet<&str>) -> Option<OpenJdkTag> {
    let mut candidate = tag.previous();
    while let Some(previous) = candidate {
        if known.contains(previous.tag().name()) {
            return Some(previous);
        }
        candidate = previous.previous();
    }
    None
}

fn tag_order(event: &Event, index: usize) -> OrderKey {
    match event {
        Event::NewOpenJdkTagCommits { tag, .. } => (
            Phase::Tags,
            0,
            u64::from(tag.build_num().unwrap_or_default()),
            tag.tag().name().to_string(),
            index,
        ),
        other => (Phase::Tags, 1, 0, other.subject().to_string(), index),
    }
}

/// Queue a delivery, or record it right away when the notifier does not
/// handle this kind of event
fn offer(
    plan: &mut CyclePlan,
    index: usize,
    listener: &Listener<'_>,
    event: Event,
    bookmark: Bookmark,
    order: OrderKey,
) -> Result<()> {
    if !listener.capabilities.contains(event.kind().capability()) {
        debug!("{} does not handle {} events, skipping {}", listener.name, event.kind(), event);
        return bookmark.record_done(&mut plan.bookkeeping, listener.name);
    }
    plan.deliveries.push(Delivery {
        listener: index,
        event,
        bookmark,
        order,
    });
    Ok(())
}
