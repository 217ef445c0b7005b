// # Slack Notifier
//
// Posts one message per new commit to a Slack incoming webhook.
//
// ## Behavior
//
// - One POST per commit, oldest first
// - Only commit events are handled; tags and branches are recorded as
//   handled by the engine without reaching this notifier
// - Not idempotent: a message that was posted cannot be taken back, so the
//   engine offers every event at most once
// - Dry-run mode (`NOTIFYBOT_MODE=dry-run`) logs the payload instead of
//   posting it
//
// ## Security
//
// The webhook URL is a credential. It never appears in logs or in the
// Debug output.

use async_trait::async_trait;
use notifybot_core::config::NotifierConfig;
use notifybot_core::traits::{
    Capabilities, Notifier, NotifierError, NotifierFactory, NotifyContext,
};
use notifybot_core::types::{Branch, Commit};
use notifybot_core::{Error, Result};
use serde::Serialize;
use std::time::Duration;

/// Default HTTP timeout for webhook requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const LINK_COLOR: &str = "#cc0e31";

/// Body of an incoming webhook request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackAttachment {
    pub fallback: String,
    pub color: String,
    pub title: String,
    pub title_link: String,
}

pub struct SlackNotifier {
    name: String,
    /// ⚠️ NEVER log this value
    webhook_url: String,
    username: Option<String>,
    commit_url: Option<String>,
    client: reqwest::Client,
    dry_run: bool,
}

// Custom Debug implementation that hides the webhook URL
impl std::fmt::Debug for SlackNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackNotifier")
            .field("name", &self.name)
            .field("webhook_url", &"<REDACTED>")
            .field("username", &self.username)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl SlackNotifier {
    /// Create a new Slack notifier
    ///
    /// # Parameters
    ///
    /// - `name`: History key of this notifier
    /// - `webhook_url`: Incoming webhook URL
    /// - `username`: Display name of the poster, Slack's default when `None`
    /// - `commit_url`: Link template, `{hash}` is replaced by the commit hash
    /// - `dry_run`: Log payloads instead of posting them
    pub fn new(
        name: impl Into<String>,
        webhook_url: impl Into<String>,
        username: Option<String>,
        commit_url: Option<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let webhook_url = webhook_url.into();
        if webhook_url.is_empty() {
            return Err(Error::config("Slack webhook URL cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            webhook_url,
            username: username.filter(|u| !u.is_empty()),
            commit_url,
            client,
            dry_run,
        })
    }

    /// The message announcing one commit
    pub fn message(&self, commit: &Commit, branch: &Branch) -> SlackMessage {
        let text = format!(
            "{}: {}: {}\nAuthor: {}\nCommitter: {}\nDate: {}\n",
            branch,
            commit.hash.abbreviate(),
            commit.title(),
            commit.author.name,
            commit.committer.name,
            commit.authored.to_rfc2822(),
        );
        let attachments = self
            .commit_url
            .as_ref()
            .map(|template| SlackAttachment {
                fallback: "Link to commit".to_string(),
                color: LINK_COLOR.to_string(),
                title: "View commit".to_string(),
                title_link: template.replace("{hash}", commit.hash.hex()),
            })
            .into_iter()
            .collect();

        SlackMessage {
            username: self.username.clone(),
            text,
            attachments,
        }
    }

    async fn post(&self, message: &SlackMessage) -> std::result::Result<(), NotifierError> {
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would post to Slack: {}",
                serde_json::to_string(message)?
            );
            return Ok(());
        }

        let response = self
            .client
            .post(&self.webhook_url)
            .json(message)
            .send()
            .await
            // reqwest errors may carry the URL
            .map_err(|e| NotifierError::delivery(format!("HTTP request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(NotifierError::delivery(match status.as_u16() {
                403 | 404 | 410 => format!("Webhook rejected or revoked: {}", status),
                429 => format!("Rate limit exceeded: {}", status),
                _ => format!("Webhook returned {}: {}", status, error_text.trim()),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::COMMITS
    }

    async fn on_new_commits(
        &self,
        _ctx: &NotifyContext<'_>,
        commits: &[Commit],
        branch: &Branch,
    ) -> std::result::Result<(), NotifierError> {
        for commit in commits {
            self.post(&self.message(commit, branch)).await?;
        }
        tracing::debug!("Posted {} commit(s) on {} to Slack", commits.len(), branch);
        Ok(())
    }
}

/// Factory for creating Slack notifiers
pub struct SlackNotifierFactory;

impl NotifierFactory for SlackNotifierFactory {
    fn create(&self, config: &NotifierConfig) -> Result<Box<dyn Notifier>> {
        match config {
            NotifierConfig::Slack {
                name,
                webhook_url,
                username,
                commit_url,
            } => {
                // Check for dry-run mode environment variable
                let dry_run = std::env::var("NOTIFYBOT_MODE")
                    .unwrap_or_default()
                    .eq_ignore_ascii_case("dry-run");

                if dry_run {
                    tracing::warn!("Slack notifier running in DRY-RUN mode - nothing will be posted");
                }

                Ok(Box::new(SlackNotifier::new(
                    name.clone(),
                    webhook_url.clone(),
                    username.clone(),
                    commit_url.clone(),
                    dry_run,
                )?))
            }
            _ => Err(Error::config("Invalid config for Slack notifier")),
        }
    }
}

/// Register the Slack notifier with a registry
///
/// # Example
///
/// ```rust
/// use notifybot_core::NotifierRegistry;
///
/// let registry = NotifierRegistry::new();
/// notifybot_slack::register(&registry);
/// assert!(registry.has_notifier("slack"));
/// ```
pub fn register(registry: &notifybot_core::NotifierRegistry) {
    registry.register_notifier("slack", Box::new(SlackNotifierFactory));
}
