//! Thin wrapper around the `git` binary.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

/// Errors from running git
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// git exited with a failure status
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// git could not be started or talked to
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),

    /// git printed something we could not understand
    #[error("unexpected git output: {0}")]
    Parse(String),
}

impl GitError {
    /// Stderr of a failed command, empty otherwise
    pub fn stderr(&self) -> &str {
        match self {
            GitError::CommandFailed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

impl From<GitError> for notifybot_core::Error {
    fn from(err: GitError) -> Self {
        notifybot_core::Error::vcs(err.to_string())
    }
}

pub type GitResult<T> = std::result::Result<T, GitError>;

/// Runs git commands inside one repository directory
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// A git command that ignores system and user configuration and
    /// never prompts for credentials
    pub fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir);
        cmd.env("GIT_CONFIG_NOSYSTEM", "1");
        cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a command and return its raw output, whatever the exit status
    pub async fn output(&self, args: &[&str]) -> GitResult<Output> {
        trace!("git {} in {}", args.join(" "), self.workdir.display());
        Ok(self.command().args(args).output().await?)
    }

    /// Run a command that must succeed and return its stdout
    pub async fn run(&self, args: &[&str]) -> GitResult<String> {
        let output = self.output(args).await?;
        check(args, output)
    }

    /// Like [`Git::run`], with trailing whitespace removed
    pub async fn run_trimmed(&self, args: &[&str]) -> GitResult<String> {
        Ok(self.run(args).await?.trim_end().to_string())
    }

    /// Run a command with `input` on stdin
    pub async fn run_with_input(
        &self,
        args: &[&str],
        input: &str,
        envs: &[(&str, &str)],
    ) -> GitResult<String> {
        trace!("git {} in {} with input", args.join(" "), self.workdir.display());
        let mut child = self
            .command()
            .args(args)
            .envs(envs.iter().copied())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            // closing stdin lets git finish reading
            drop(stdin);
        }
        let output = child.wait_with_output().await?;
        check(args, output)
    }

    /// Create a bare repository with an `origin` remote, or point the
    /// existing one at `url`
    pub async fn init_bare(&self, url: &str) -> GitResult<()> {
        tokio::fs::create_dir_all(&self.workdir).await?;
        if !self.workdir.join("HEAD").exists() {
            self.run(&["init", "--bare", "--quiet"]).await?;
        }
        let has_origin = self
            .run(&["remote"])
            .await?
            .lines()
            .any(|remote| remote == "origin");
        if has_origin {
            self.run(&["remote", "set-url", "origin", url]).await?;
        } else {
            self.run(&["remote", "add", "origin", url]).await?;
        }
        Ok(())
    }

    /// Hash of a revision, `None` when it does not name a commit
    pub async fn rev_parse_commit(&self, rev: &str) -> GitResult<Option<String>> {
        let target = format!("{rev}^{{commit}}");
        let output = self
            .output(&["rev-parse", "--verify", "--quiet", &target])
            .await?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }
}

fn check(args: &[&str], output: Output) -> GitResult<String> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(GitError::CommandFailed {
            command: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Whether the git binary can be run at all
pub async fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .await
        .is_ok_and(|output| output.status.success())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_commands_carry_stderr() {
        if !testutil::have_git() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = Git::new(dir.path());
        let err = git.run(&["rev-parse", "HEAD"]).await.unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { .. }));
        assert!(!err.stderr().is_empty());
        assert!(git_available().await);
    }

    #[tokio::test]
    async fn init_bare_is_repeatable() {
        if !testutil::have_git() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = Git::new(dir.path().join("mirror"));
        git.init_bare("https://example.com/a.git").await.unwrap();
        git.init_bare("https://example.com/b.git").await.unwrap();
        let url = git.run_trimmed(&["remote", "get-url", "origin"]).await.unwrap();
        assert_eq!(url, "https://example.com/b.git");
        assert_eq!(git.rev_parse_commit("HEAD").await.unwrap(), None);
    }
}
