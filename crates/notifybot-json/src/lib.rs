// # JSON Feed Notifier
//
// This crate appends change records to a JSON array file, one file per
// repository, for consumption by release tooling.
//
// ## Records
//
// Every new commit becomes one record:
//
// ```json
// {"url": "...", "version": "17", "build": "team", "issue": ["8123456"],
//  "user": "duke", "date": "2021-06-01 12:00:00 +0000"}
// ```
//
// A build-numbered tag becomes a single record listing the issues of every
// commit in the build, with the build written as `b07`. Tags without a
// build counter (`-ga` tags, plain tags) produce nothing.
//
// ## Delivery
//
// Appending is not idempotent, so the engine offers each event at most
// once. The file is rewritten through a temporary file and a rename, so a
// crash never leaves a truncated array behind.

use async_trait::async_trait;
use notifybot_core::config::NotifierConfig;
use notifybot_core::traits::{
    Capabilities, Notifier, NotifierError, NotifierFactory, NotifyContext,
};
use notifybot_core::types::{Annotation, Branch, Commit};
use notifybot_core::{Error, OpenJdkTag, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S +0000";

/// One entry of the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub version: String,
    pub build: String,
    pub issue: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Notifier appending [`FeedRecord`]s to `<directory>/<repository>.json`
pub struct JsonNotifier {
    name: String,
    directory: PathBuf,
    version: String,
    default_build: String,
    commit_url: Option<String>,
    // serializes read-modify-write of the feed file
    lock: Mutex<()>,
}

impl JsonNotifier {
    pub fn new(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        version: impl Into<String>,
        default_build: impl Into<String>,
        commit_url: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            version: version.into(),
            default_build: default_build.into(),
            commit_url,
            lock: Mutex::new(()),
        }
    }

    /// Feed file of a repository
    pub fn feed_path(&self, repository: &str) -> PathBuf {
        self.directory.join(format!("{repository}.json"))
    }

    fn commit_record(&self, commit: &Commit) -> FeedRecord {
        FeedRecord {
            url: self
                .commit_url
                .as_ref()
                .map(|template| template.replace("{hash}", commit.hash.hex())),
            version: self.version.clone(),
            build: self.default_build.clone(),
            issue: issues(commit),
            user: Some(commit.author.name.clone()),
            date: Some(commit.authored.format(DATE_FORMAT).to_string()),
        }
    }

    async fn append(
        &self,
        repository: &str,
        records: Vec<FeedRecord>,
    ) -> std::result::Result<(), NotifierError> {
        let _guard = self.lock.lock().await;
        let path = self.feed_path(repository);
        tokio::fs::create_dir_all(&self.directory).await?;

        let mut feed = read_feed(&path).await?;
        let added = records.len();
        feed.extend(records);

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&feed)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("Appended {} record(s) to {}", added, path.display());
        Ok(())
    }
}

impl std::fmt::Debug for JsonNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonNotifier")
            .field("name", &self.name)
            .field("directory", &self.directory)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

async fn read_feed(path: &Path) -> std::result::Result<Vec<FeedRecord>, NotifierError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Issue ids from the leading `<digits>: <summary>` lines of a message
pub fn issues(commit: &Commit) -> Vec<String> {
    commit
        .message
        .iter()
        .map_while(|line| {
            let (id, summary) = line.split_once(": ")?;
            let numeric = !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit());
            (numeric && !summary.trim().is_empty()).then(|| id.to_string())
        })
        .collect()
}

#[async_trait]
impl Notifier for JsonNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::COMMITS | Capabilities::TAGS
    }

    async fn on_new_commits(
        &self,
        ctx: &NotifyContext<'_>,
        commits: &[Commit],
        _branch: &Branch,
    ) -> std::result::Result<(), NotifierError> {
        let records = commits.iter().map(|c| self.commit_record(c)).collect();
        self.append(ctx.repository.name(), records).await
    }

    async fn on_new_openjdk_tag_commits(
        &self,
        ctx: &NotifyContext<'_>,
        commits: &[Commit],
        tag: &OpenJdkTag,
        _annotation: Option<&Annotation>,
    ) -> std::result::Result<(), NotifierError> {
        let Some(build) = tag.build_num() else {
            tracing::debug!("Tag {} has no build number, not recorded", tag.tag());
            return Ok(());
        };
        let record = FeedRecord {
            url: None,
            version: self.version.clone(),
            build: format!("b{build:02}"),
            issue: commits.iter().flat_map(issues).collect(),
            user: None,
            date: None,
        };
        self.append(ctx.repository.name(), vec![record]).await
    }
}

/// Factory for creating JSON notifiers
pub struct JsonNotifierFactory;

impl NotifierFactory for JsonNotifierFactory {
    fn create(&self, config: &NotifierConfig) -> Result<Box<dyn Notifier>> {
        match config {
            NotifierConfig::Json {
                name,
                directory,
                version,
                default_build,
                commit_url,
            } => {
                if directory.is_empty() {
                    return Err(Error::config("JSON notifier directory is required"));
                }
                Ok(Box::new(JsonNotifier::new(
                    name.clone(),
                    directory.clone(),
                    version.clone(),
                    default_build.clone(),
                    commit_url.clone(),
                )))
            }
            _ => Err(Error::config("Invalid config for JSON notifier")),
        }
    }
}

/// Register the JSON notifier with a registry
///
/// # Example
///
/// ```rust
/// use notifybot_core::NotifierRegistry;
///
/// let registry = NotifierRegistry::new();
/// notifybot_json::register(&registry);
/// assert!(registry.has_notifier("json"));
/// ```
pub fn register(registry: &notifybot_core::NotifierRegistry) {
    registry.register_notifier("json", Box::new(JsonNotifierFactory));
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifybot_core::traits::Repository;
    use notifybot_core::types::Tag;
    use notifybot_core::MemoryRepository;

    async fn commit(repo: &MemoryRepository, branch: &str, message: &str) -> Commit {
        let hash = repo.commit(branch, message);
        repo.lookup(hash.hex()).await.unwrap().unwrap()
    }

    fn notifier(dir: &Path) -> JsonNotifier {
        JsonNotifier::new(
            "json",
            dir,
            "17",
            "team",
            Some("https://git.openjdk.org/jdk/commit/{hash}".to_string()),
        )
    }

    async fn feed(notifier: &JsonNotifier, repository: &str) -> Vec<FeedRecord> {
        read_feed(&notifier.feed_path(repository)).await.unwrap()
    }

    #[tokio::test]
    async fn commits_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let repo = MemoryRepository::new("jdk");
        let ctx = NotifyContext {
            repository: &repo,
            scratch_dir: scratch.path(),
        };
        let notifier = notifier(dir.path());
        let master = Branch::new("master");

        let first = commit(&repo, "master", "8000001: First fix\n8000002: Second fix").await;
        notifier.on_new_commits(&ctx, &[first.clone()], &master).await.unwrap();
        let second = commit(&repo, "master", "Cleanup").await;
        notifier.on_new_commits(&ctx, &[second], &master).await.unwrap();

        let records = feed(&notifier, "jdk").await;
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].url.as_deref(),
            Some(format!("https://git.openjdk.org/jdk/commit/{}", first.hash).as_str())
        );
        assert_eq!(records[0].version, "17");
        assert_eq!(records[0].build, "team");
        assert_eq!(records[0].issue, vec!["8000001", "8000002"]);
        assert_eq!(records[0].user.as_deref(), Some("duke"));
        assert_eq!(
            records[0].date.as_deref(),
            Some(first.authored.format(DATE_FORMAT).to_string().as_str())
        );
        assert!(records[1].issue.is_empty());
    }

    #[tokio::test]
    async fn build_tags_list_all_issues() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let repo = MemoryRepository::new("jdk");
        let ctx = NotifyContext {
            repository: &repo,
            scratch_dir: scratch.path(),
        };
        let notifier = notifier(dir.path());

        let commits = vec![
            commit(&repo, "master", "8000001: First fix").await,
            commit(&repo, "master", "8000002: Second fix").await,
        ];
        let tag = OpenJdkTag::create(&Tag::new("jdk-17+7")).unwrap();
        notifier
            .on_new_openjdk_tag_commits(&ctx, &commits, &tag, None)
            .await
            .unwrap();

        let records = feed(&notifier, "jdk").await;
        assert_eq!(
            records,
            vec![FeedRecord {
                url: None,
                version: "17".to_string(),
                build: "b07".to_string(),
                issue: vec!["8000001".to_string(), "8000002".to_string()],
                user: None,
                date: None,
            }]
        );
    }

    #[tokio::test]
    async fn ga_tags_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let repo = MemoryRepository::new("jdk");
        let ctx = NotifyContext {
            repository: &repo,
            scratch_dir: scratch.path(),
        };
        let notifier = notifier(dir.path());

        let commits = vec![commit(&repo, "master", "8000001: Fix").await];
        let tag = OpenJdkTag::create(&Tag::new("jdk-17-ga")).unwrap();
        notifier
            .on_new_openjdk_tag_commits(&ctx, &commits, &tag, None)
            .await
            .unwrap();
        assert!(!notifier.feed_path("jdk").exists());
    }

    #[tokio::test]
    async fn corrupt_feed_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let repo = MemoryRepository::new("jdk");
        let ctx = NotifyContext {
            repository: &repo,
            scratch_dir: scratch.path(),
        };
        let notifier = notifier(dir.path());
        std::fs::write(notifier.feed_path("jdk"), "{not json").unwrap();

        let commits = vec![commit(&repo, "master", "Fix").await];
        let err = notifier
            .on_new_commits(&ctx, &commits, &Branch::new("master"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifierError::Json(_)));
    }

    #[tokio::test]
    async fn issue_lines_stop_at_first_other_line() {
        let repo = MemoryRepository::new("jdk");
        let commit = commit(
            &repo,
            "master",
            "8000001: Fix\nReviewed-by: duke\n8000002: Not an issue line",
        )
        .await;
        assert_eq!(issues(&commit), vec!["8000001"]);
    }

    #[test]
    fn test_factory_creation() {
        let factory = JsonNotifierFactory;
        let config = NotifierConfig::Json {
            name: "json".to_string(),
            directory: "/tmp/feeds".to_string(),
            version: "17".to_string(),
            default_build: "team".to_string(),
            commit_url: None,
        };
        let notifier = factory.create(&config).unwrap();
        assert_eq!(notifier.name(), "json");
        assert!(!notifier.idempotent());
        assert!(notifier.capabilities().contains(Capabilities::TAGS));
        assert!(!notifier.capabilities().contains(Capabilities::BRANCHES));
    }

    #[test]
    fn test_factory_rejects_other_configs() {
        let config = NotifierConfig::Slack {
            name: "slack".to_string(),
            webhook_url: "https://hooks.example.com/x".to_string(),
            username: None,
            commit_url: None,
        };
        assert!(JsonNotifierFactory.create(&config).is_err());
    }

    #[test]
    fn test_register() {
        let registry = notifybot_core::NotifierRegistry::new();
        register(&registry);
        assert!(registry.has_notifier("json"));
    }
}
