//! Repository backed by a local bare mirror.
//!
//! Remote branches are fetched into `refs/notifybot/heads/*` so that they
//! never collide with the mirror's own references; tags keep their usual
//! place. Every fetch prunes, so deleted branches and tags disappear.

use crate::command::{Git, GitError, GitResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifybot_core::traits::Repository;
use notifybot_core::types::{Annotation, Author, Commit, CommitRange, Hash, Reference, Tag};
use notifybot_core::{Error, Result};
use std::path::Path;
use tracing::{debug, info};

const BRANCH_NAMESPACE: &str = "refs/notifybot/heads";

const FIELD: char = '\x1f';
const RECORD: char = '\x1e';

// hash, parents, author, committer, dates, raw message
const COMMIT_FORMAT: &str = "--format=%H%x1f%P%x1f%an%x1f%ae%x1f%cn%x1f%ce%x1f%at%x1f%ct%x1f%B%x1e";

/// A repository mirrored with the git CLI
#[derive(Debug, Clone)]
pub struct GitRepository {
    name: String,
    url: String,
    git: Git,
}

impl GitRepository {
    /// Open the mirror at `local_path`, creating it when needed
    ///
    /// Nothing is fetched until [`Repository::fetch_all`] is called.
    pub async fn open(
        name: impl Into<String>,
        url: impl Into<String>,
        local_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let name = name.into();
        let url = url.into();
        if url.is_empty() {
            return Err(Error::config(format!("No remote URL for repository {name}")));
        }
        let git = Git::new(local_path.as_ref());
        git.init_bare(&url).await?;
        info!("Opened mirror of {} at {}", url, git.workdir().display());
        Ok(Self { name, url, git })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_path(&self) -> &Path {
        self.git.workdir()
    }

    fn range_arg(range: &CommitRange) -> String {
        match &range.from {
            Some(from) => format!("{}..{}", from, range.to),
            None => range.to.to_string(),
        }
    }

    async fn log(&self, args: &[&str]) -> GitResult<Vec<Commit>> {
        let mut full = vec!["log", COMMIT_FORMAT];
        full.extend_from_slice(args);
        let stdout = self.git.run(&full).await?;
        stdout
            .split(RECORD)
            .map(|record| record.trim_start_matches('\n'))
            .filter(|record| !record.is_empty())
            .map(parse_commit)
            .collect()
    }
}

fn timestamp(value: &str) -> GitResult<DateTime<Utc>> {
    value
        .parse::<i64>()
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .ok_or_else(|| GitError::Parse(format!("bad timestamp {value:?}")))
}

fn parse_commit(record: &str) -> GitResult<Commit> {
    let fields: Vec<&str> = record.splitn(9, FIELD).collect();
    let [hash, parents, an, ae, cn, ce, at, ct, body] = fields[..] else {
        return Err(GitError::Parse(format!("bad commit record {record:?}")));
    };

    let mut message: Vec<String> = body.lines().map(str::to_string).collect();
    while message.last().is_some_and(|line| line.trim().is_empty()) {
        message.pop();
    }

    Ok(Commit {
        hash: Hash::new(hash),
        parents: parents.split_whitespace().map(Hash::new).collect(),
        author: Author::new(an, ae),
        committer: Author::new(cn, ce),
        authored: timestamp(at)?,
        committed: timestamp(ct)?,
        message,
    })
}

fn parse_annotation(tag: &Tag, line: &str) -> GitResult<Option<Annotation>> {
    let fields: Vec<&str> = line.splitn(6, FIELD).collect();
    let [object_type, target, name, email, date, message] = fields[..] else {
        return Err(GitError::Parse(format!("bad tag record {line:?}")));
    };
    if object_type != "tag" {
        return Ok(None);
    }
    Ok(Some(Annotation {
        name: tag.clone(),
        target: Hash::new(target),
        author: Author::new(name, email.trim_start_matches('<').trim_end_matches('>')),
        date: timestamp(date)?,
        message: message.trim_end().to_string(),
    }))
}

#[async_trait]
impl Repository for GitRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_all(&self) -> Result<()> {
        let heads = format!("+refs/heads/*:{BRANCH_NAMESPACE}/*");
        self.git
            .run(&[
                "fetch",
                "--quiet",
                "--prune",
                "--force",
                "origin",
                &heads,
                "+refs/tags/*:refs/tags/*",
            ])
            .await
            .map_err(|e| Error::vcs(format!("Failed to fetch {}: {}", self.url, e)))?;
        debug!("Fetched {}", self.url);
        Ok(())
    }

    async fn branches(&self) -> Result<Vec<Reference>> {
        let stdout = self
            .git
            .run(&[
                "for-each-ref",
                "--format=%(refname:strip=3)%1f%(objectname)",
                BRANCH_NAMESPACE,
            ])
            .await?;
        let mut branches = stdout
            .lines()
            .filter_map(|line| line.split_once(FIELD))
            .map(|(name, hash)| Reference::new(name, Hash::new(hash)))
            .collect::<Vec<_>>();
        branches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(branches)
    }

    async fn tags(&self) -> Result<Vec<Tag>> {
        let stdout = self
            .git
            .run(&["for-each-ref", "--format=%(refname:strip=2)", "refs/tags"])
            .await?;
        let mut tags: Vec<Tag> = stdout.lines().map(Tag::new).collect();
        tags.sort();
        Ok(tags)
    }

    async fn resolve(&self, rev: &str) -> Result<Option<Hash>> {
        let candidates = [
            format!("{BRANCH_NAMESPACE}/{rev}"),
            format!("refs/tags/{rev}"),
            rev.to_string(),
        ];
        for candidate in &candidates {
            if let Some(hash) = self.git.rev_parse_commit(candidate).await? {
                return Ok(Some(Hash::new(hash)));
            }
        }
        Ok(None)
    }

    async fn commits(&self, range: &CommitRange) -> Result<Vec<Commit>> {
        let range = Self::range_arg(range);
        Ok(self.log(&["--topo-order", "--reverse", &range, "--"]).await?)
    }

    async fn commit_count(&self, range: &CommitRange) -> Result<usize> {
        let range = Self::range_arg(range);
        let count = self
            .git
            .run_trimmed(&["rev-list", "--count", &range, "--"])
            .await?;
        count
            .parse()
            .map_err(|_| Error::vcs(format!("Unexpected commit count {count:?}")))
    }

    async fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> Result<bool> {
        let output = self
            .git
            .output(&["merge-base", "--is-ancestor", ancestor.hex(), descendant.hex()])
            .await?;
        // 0 = ancestor, 1 = not an ancestor, anything else is an error
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Error::vcs(format!(
                "git merge-base --is-ancestor {} {} failed: {}",
                ancestor,
                descendant,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn lookup(&self, rev: &str) -> Result<Option<Commit>> {
        let Some(hash) = self.resolve(rev).await? else {
            return Ok(None);
        };
        let mut commits = self.log(&["-1", hash.hex(), "--"]).await?;
        Ok(commits.pop())
    }

    async fn annotate(&self, tag: &Tag) -> Result<Option<Annotation>> {
        let reference = format!("refs/tags/{tag}");
        let stdout = self
            .git
            .run(&[
                "for-each-ref",
                "--format=%(objecttype)%1f%(*objectname)%1f%(taggername)%1f%(taggeremail)%1f%(taggerdate:unix)%1f%(contents)",
                &reference,
            ])
            .await?;
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        Ok(parse_annotation(tag, &stdout)?)
    }

    async fn total_commits(&self) -> Result<usize> {
        let glob = format!("--glob={BRANCH_NAMESPACE}");
        let count = self
            .git
            .run_trimmed(&["rev-list", "--count", &glob, "--"])
            .await?;
        count
            .parse()
            .map_err(|_| Error::vcs(format!("Unexpected commit count {count:?}")))
    }
}
