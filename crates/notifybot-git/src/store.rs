// # Git Ref Store
//
// RefStore on a branch of a remote git repository.
//
// ## Write Protocol
//
// 1. Build a commit in the local scratch repository: the new blob, the
//    parent's tree with that one entry replaced, and the parent as the only
//    parent commit.
// 2. Push it with `--force-with-lease=<ref>:<parent>`. The remote accepts
//    the push only if the branch still points at the parent (or, for a
//    first write, does not exist yet).
// 3. A lease or fast-forward failure is reported as `Rejected`; anything
//    else is an error.
//
// ## Concurrency
//
// Exclusion between bot instances comes from the remote alone. Within one
// process a mutex keeps fetches and pushes of the scratch repository from
// tripping over each other's ref locks.

use crate::command::{Git, GitError};
use async_trait::async_trait;
use notifybot_core::config::HistoryStoreConfig;
use notifybot_core::traits::{RefStore, RefStoreFactory, StoredFile, WriteOutcome, WriteRequest};
use notifybot_core::types::Hash;
use notifybot_core::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

const LEDGER_NAMESPACE: &str = "refs/notifybot/ledger";

/// Messages git prints when a push lost a race
const REJECTION_MARKERS: [&str; 4] = ["stale info", "non-fast-forward", "fetch first", "rejected"];

/// History store on a remote git repository
pub struct GitRefStore {
    url: String,
    git: Git,
    ready: OnceCell<()>,
    lock: Mutex<()>,
}

impl GitRefStore {
    /// Create a store with a scratch repository at `local_path`
    ///
    /// The scratch repository is set up on first use.
    pub fn new(url: impl Into<String>, local_path: impl AsRef<Path>) -> Self {
        Self {
            url: url.into(),
            git: Git::new(local_path.as_ref()),
            ready: OnceCell::new(),
            lock: Mutex::new(()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn ensure_ready(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                self.git.init_bare(&self.url).await?;
                info!(
                    "History store on {} (scratch at {})",
                    self.url,
                    self.git.workdir().display()
                );
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    fn local_ref(reference: &str) -> String {
        format!("{LEDGER_NAMESPACE}/{reference}")
    }

    /// Fetch the remote branch, returning its head
    async fn fetch(&self, reference: &str) -> Result<Option<Hash>> {
        let local = Self::local_ref(reference);
        let refspec = format!("+refs/heads/{reference}:{local}");
        match self
            .git
            .run(&["fetch", "--quiet", "--force", "origin", &refspec])
            .await
        {
            Ok(_) => {}
            Err(e) if e.stderr().contains("couldn't find remote ref") => {
                // forget whatever an earlier fetch saw
                if let Err(e) = self.git.run(&["update-ref", "-d", &local]).await {
                    debug!("Failed to drop stale {}: {}", local, e);
                }
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::ledger(format!(
                    "Failed to fetch {} from {}: {}",
                    reference, self.url, e
                )));
            }
        }
        Ok(self.git.rev_parse_commit(&local).await?.map(Hash::new))
    }

    async fn file_content(&self, head: &Hash, file: &str) -> Result<String> {
        let listing = self
            .git
            .run(&["ls-tree", head.hex(), file])
            .await?;
        if listing.trim().is_empty() {
            return Ok(String::new());
        }
        let object = format!("{}:{}", head, file);
        Ok(self.git.run(&["cat-file", "blob", &object]).await?)
    }

    async fn build_commit(&self, request: &WriteRequest<'_>) -> Result<String> {
        let blob = self
            .git
            .run_with_input(&["hash-object", "-w", "--stdin"], request.content, &[])
            .await?;
        let entry = format!("100644 blob {}\t{}", blob.trim(), request.file);

        let mut entries = Vec::new();
        if let Some(parent) = request.parent {
            let listing = self.git.run(&["ls-tree", parent.hex()]).await?;
            entries.extend(
                listing
                    .lines()
                    .filter(|line| line.split_once('\t').map(|(_, path)| path) != Some(request.file))
                    .map(str::to_string),
            );
        }
        entries.push(entry);
        let mut tree_input = entries.join("\n");
        tree_input.push('\n');
        let tree = self.git.run_with_input(&["mktree"], &tree_input, &[]).await?;

        let identity = [
            ("GIT_AUTHOR_NAME", request.identity.name.as_str()),
            ("GIT_AUTHOR_EMAIL", request.identity.email.as_str()),
            ("GIT_COMMITTER_NAME", request.identity.name.as_str()),
            ("GIT_COMMITTER_EMAIL", request.identity.email.as_str()),
        ];
        let tree = tree.trim().to_string();
        let mut args = vec!["commit-tree", tree.as_str()];
        if let Some(parent) = request.parent {
            args.extend(["-p", parent.hex()]);
        }
        // message comes from stdin
        let commit = self
            .git
            .run_with_input(&args, request.message, &identity)
            .await?;
        Ok(commit.trim().to_string())
    }
}

fn is_rejection(err: &GitError) -> bool {
    let stderr = err.stderr();
    REJECTION_MARKERS.iter().any(|marker| stderr.contains(marker))
}

#[async_trait]
impl RefStore for GitRefStore {
    async fn read(&self, reference: &str, file: &str) -> Result<Option<StoredFile>> {
        self.ensure_ready().await?;
        let _guard = self.lock.lock().await;
        let Some(head) = self.fetch(reference).await? else {
            debug!("{} does not exist on {} yet", reference, self.url);
            return Ok(None);
        };
        let content = self.file_content(&head, file).await?;
        Ok(Some(StoredFile { head, content }))
    }

    async fn write(&self, request: WriteRequest<'_>) -> Result<WriteOutcome> {
        if request.file.is_empty() || request.file.contains('/') {
            return Err(Error::config(format!(
                "Ledger file {:?} must be a plain file name",
                request.file
            )));
        }
        self.ensure_ready().await?;
        let _guard = self.lock.lock().await;

        let commit = self.build_commit(&request).await?;
        let lease = format!(
            "--force-with-lease=refs/heads/{}:{}",
            request.reference,
            request.parent.map(Hash::hex).unwrap_or_default()
        );
        let refspec = format!("{}:refs/heads/{}", commit, request.reference);

        match self
            .git
            .run(&["push", &lease, "origin", &refspec])
            .await
        {
            Ok(_) => {
                let local = Self::local_ref(request.reference);
                self.git.run(&["update-ref", &local, &commit]).await?;
                debug!("Pushed {} to {} on {}", commit, request.reference, self.url);
                Ok(WriteOutcome::Pushed(Hash::new(commit)))
            }
            Err(e) if is_rejection(&e) => {
                warn!("Push of {} to {} rejected", request.reference, self.url);
                Ok(WriteOutcome::Rejected {
                    details: e.stderr().to_string(),
                })
            }
            Err(e) => Err(Error::ledger(format!(
                "Failed to push {} to {}: {}",
                request.reference, self.url, e
            ))),
        }
    }
}

/// Factory for git-backed history stores
#[derive(Debug, Default)]
pub struct GitRefStoreFactory;

impl RefStoreFactory for GitRefStoreFactory {
    fn create(&self, config: &HistoryStoreConfig) -> Result<Arc<dyn RefStore>> {
        match config {
            HistoryStoreConfig::Git { url, local_path } => {
                config.validate()?;
                Ok(Arc::new(GitRefStore::new(url.clone(), local_path)))
            }
            other => Err(Error::config(format!(
                "Git store factory cannot handle {} configuration",
                other.type_name()
            ))),
        }
    }
}
