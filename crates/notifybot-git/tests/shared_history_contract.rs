//! Contract Test: Shared History
//!
//! Two bot instances with their own mirrors share one history remote.
//!
//! Constraints verified:
//! - An event delivered by one instance is not delivered again by the other
//! - Branch cursors land on the `history` branch of the remote
//! - Tags are recorded the same way

use async_trait::async_trait;
use notifybot_core::config::{HistoryConfig, NotifyConfig};
use notifybot_core::traits::{Notifier, NotifierError, NotifyContext};
use notifybot_core::types::{Annotation, Branch, Commit, Tag};
use notifybot_core::{NotifyEngine, UpdateHistory};
use notifybot_git::{GitRefStore, GitRepository};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_AUTHOR_NAME", "Duke")
        .env("GIT_AUTHOR_EMAIL", "duke@openjdk.org")
        .env("GIT_COMMITTER_NAME", "Duke")
        .env("GIT_COMMITTER_EMAIL", "duke@openjdk.org")
        .args(args)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn have_git() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn bare(path: &Path) {
    std::fs::create_dir_all(path).unwrap();
    git(path, &["init", "--bare", "--quiet", "--initial-branch=master"]);
}

#[derive(Default, Clone)]
struct Mailbox(Arc<Mutex<Vec<String>>>);

impl Mailbox {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

struct MailNotifier(Mailbox);

#[async_trait]
impl Notifier for MailNotifier {
    fn name(&self) -> &str {
        "mail"
    }

    async fn on_new_commits(
        &self,
        _ctx: &NotifyContext<'_>,
        commits: &[Commit],
        branch: &Branch,
    ) -> Result<(), NotifierError> {
        let mut mails = self.0.0.lock().unwrap();
        for commit in commits {
            mails.push(format!("{}: {}", branch, commit.title()));
        }
        Ok(())
    }

    async fn on_new_tag_commit(
        &self,
        _ctx: &NotifyContext<'_>,
        _commit: &Commit,
        tag: &Tag,
        _annotation: Option<&Annotation>,
    ) -> Result<(), NotifierError> {
        self.0.0.lock().unwrap().push(format!("tag {tag}"));
        Ok(())
    }
}

struct Setup {
    _dir: tempfile::TempDir,
    root: PathBuf,
    work: PathBuf,
    remote: PathBuf,
    history: PathBuf,
}

impl Setup {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let remote = root.join("jdk.git");
        let history = root.join("history.git");
        let work = root.join("work");
        bare(&remote);
        bare(&history);
        git(&root, &["clone", "--quiet", remote.to_str().unwrap(), work.to_str().unwrap()]);
        git(&work, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        Self {
            _dir: dir,
            root,
            work,
            remote,
            history,
        }
    }

    fn push_commit(&self, message: &str) -> String {
        git(&self.work, &["commit", "--quiet", "--allow-empty", "-m", message]);
        git(&self.work, &["push", "--quiet", "origin", "master", "--tags"]);
        git(&self.work, &["rev-parse", "HEAD"])
    }

    /// One bot instance with a private mirror and history clone
    async fn instance(&self, id: &str) -> (NotifyEngine, Mailbox) {
        let repository = GitRepository::open(
            "jdk",
            self.remote.to_str().unwrap(),
            self.root.join(format!("{id}-mirror")),
        )
        .await
        .unwrap();
        let store = GitRefStore::new(
            self.history.to_str().unwrap(),
            self.root.join(format!("{id}-history")),
        );
        let history = UpdateHistory::open(Arc::new(store), &HistoryConfig::default())
            .await
            .unwrap();

        let mut config = NotifyConfig::new("jdk", "master|jdk[0-9]+");
        config.engine.scratch_dir = self.root.join(format!("{id}-scratch")).display().to_string();

        let mailbox = Mailbox::default();
        let notifier = MailNotifier(mailbox.clone());
        let (engine, _events) =
            NotifyEngine::new(Box::new(repository), history, vec![Box::new(notifier)], config)
                .unwrap();
        (engine, mailbox)
    }

    fn history_file(&self, file: &str) -> String {
        git(&self.history, &["show", &format!("refs/heads/history:{file}")])
    }
}

#[tokio::test]
async fn instances_do_not_repeat_each_other() {
    if !have_git() {
        return;
    }
    let setup = Setup::new();
    setup.push_commit("Initial import");

    let (first, first_mail) = setup.instance("a").await;
    let (second, second_mail) = setup.instance("b").await;

    first.run_one_poll_cycle().await.unwrap();
    assert!(first_mail.take().is_empty());

    let fix = setup.push_commit("8000001: Fix");
    second.run_one_poll_cycle().await.unwrap();
    assert_eq!(second_mail.take(), vec!["master: 8000001: Fix"]);

    first.run_one_poll_cycle().await.unwrap();
    assert!(first_mail.take().is_empty());

    assert!(setup
        .history_file("branches.txt")
        .lines()
        .any(|line| line == format!("mail:master {fix}")));
}

#[tokio::test]
async fn tags_are_recorded_on_the_history_branch() {
    if !have_git() {
        return;
    }
    let setup = Setup::new();
    let base = setup.push_commit("Initial import");
    let (engine, mail) = setup.instance("a").await;
    engine.run_one_poll_cycle().await.unwrap();

    git(&setup.work, &["tag", "release-1", &base]);
    setup.push_commit("Follow-up");
    engine.run_one_poll_cycle().await.unwrap();

    let mails = mail.take();
    assert!(mails.contains(&"tag release-1".to_string()));
    assert!(mails.contains(&"master: Follow-up".to_string()));
    assert!(setup.history_file("tags.txt").contains("release-1"));

    engine.run_one_poll_cycle().await.unwrap();
    assert!(mail.take().is_empty());
}
