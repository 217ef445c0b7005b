// # notifybotd - Repository Notification Daemon
//
// Thin integration layer: all polling, reconciliation and delivery logic
// lives in notifybot-core.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering notifiers and history stores
// 4. Running the poll loop until SIGTERM or SIGINT
//
// ## Configuration
//
// `NOTIFYBOT_CONFIG` may point to a JSON file holding a complete
// `NotifyConfig`. Otherwise everything comes from the environment:
//
// ### Repository
// - `NOTIFYBOT_REPOSITORY_NAME`: Name used in subjects and feed file names
// - `NOTIFYBOT_REPOSITORY_URL`: Remote to poll
// - `NOTIFYBOT_REPOSITORY_PATH`: Local mirror directory
// - `NOTIFYBOT_BRANCHES`: Pattern of watched branches (default `master`)
// - `NOTIFYBOT_EXCLUDED_BRANCHES`: Pattern of ignored branches
//
// ### History
// - `NOTIFYBOT_HISTORY_TYPE`: git, file or memory (default git)
// - `NOTIFYBOT_HISTORY_URL`: Remote holding the history refs (for git)
// - `NOTIFYBOT_HISTORY_PATH`: Scratch clone (for git) or state file (for file)
// - `NOTIFYBOT_MAX_PUSH_ATTEMPTS`: Ledger write attempts
//
// ### Notifiers
// - `NOTIFYBOT_JSON_DIRECTORY`, `NOTIFYBOT_JSON_VERSION`, `NOTIFYBOT_JSON_BUILD`
// - `NOTIFYBOT_SLACK_WEBHOOK_URL`, `NOTIFYBOT_SLACK_USERNAME`
// - `NOTIFYBOT_COMMIT_URL`: Commit link template, `{hash}` is replaced
//
// ### Engine
// - `NOTIFYBOT_POLL_INTERVAL`: Seconds between polls
// - `NOTIFYBOT_SCRATCH_DIR`: Root of the notifier scratch directories
// - `NOTIFYBOT_LOG_LEVEL`: trace, debug, info, warn or error
//
// ## Example
//
// ```bash
// export NOTIFYBOT_REPOSITORY_NAME=jdk
// export NOTIFYBOT_REPOSITORY_URL=https://github.com/openjdk/jdk.git
// export NOTIFYBOT_REPOSITORY_PATH=/var/lib/notifybot/jdk.git
// export NOTIFYBOT_BRANCHES='master|jdk[0-9]+'
// export NOTIFYBOT_HISTORY_URL=git@example.com:bots/history.git
// export NOTIFYBOT_HISTORY_PATH=/var/lib/notifybot/history.git
// export NOTIFYBOT_SLACK_WEBHOOK_URL=https://hooks.slack.com/services/...
//
// notifybotd
// ```

use anyhow::{Context, Result};
use notifybot_core::config::{HistoryStoreConfig, NotifierConfig, NotifyConfig};
use notifybot_core::{EngineEvent, NotifierRegistry, NotifyEngine, UpdateHistory};
use notifybot_git::GitRepository;
use std::env;
use std::process::ExitCode;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum NotifyExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<NotifyExitCode> for ExitCode {
    fn from(code: NotifyExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    notify: NotifyConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = var("NOTIFYBOT_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        if let Some(path) = var("NOTIFYBOT_CONFIG") {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read NOTIFYBOT_CONFIG file {}", path))?;
            let notify = serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse NOTIFYBOT_CONFIG file {}", path))?;
            return Ok(Self { notify, log_level });
        }

        let name = var("NOTIFYBOT_REPOSITORY_NAME").context(
            "NOTIFYBOT_REPOSITORY_NAME is required. \
            Set it via: export NOTIFYBOT_REPOSITORY_NAME=jdk",
        )?;
        let url = var("NOTIFYBOT_REPOSITORY_URL").context(
            "NOTIFYBOT_REPOSITORY_URL is required. \
            Set it via: export NOTIFYBOT_REPOSITORY_URL=https://github.com/openjdk/jdk.git",
        )?;
        let mirror = var("NOTIFYBOT_REPOSITORY_PATH")
            .unwrap_or_else(|| format!("/var/lib/notifybot/{}.git", name));
        let branches = var("NOTIFYBOT_BRANCHES").unwrap_or_else(|| "master".to_string());

        let mut notify = NotifyConfig::new(name, branches);
        notify.repository = notify.repository.clone().with_remote(url, mirror);
        if let Some(excluded) = var("NOTIFYBOT_EXCLUDED_BRANCHES") {
            notify = notify.with_excluded_branches(excluded);
        }

        let store = match var("NOTIFYBOT_HISTORY_TYPE").as_deref().unwrap_or("git") {
            "git" => HistoryStoreConfig::Git {
                url: var("NOTIFYBOT_HISTORY_URL").unwrap_or_default(),
                local_path: var("NOTIFYBOT_HISTORY_PATH").unwrap_or_default(),
            },
            "file" => HistoryStoreConfig::File {
                path: var("NOTIFYBOT_HISTORY_PATH").unwrap_or_default(),
            },
            "memory" => HistoryStoreConfig::Memory,
            other => anyhow::bail!(
                "NOTIFYBOT_HISTORY_TYPE '{}' is not supported. \
                Supported types: git, file, memory",
                other
            ),
        };
        notify.history = notify.history.clone().with_store(store);
        if let Some(attempts) = parse_var(&var, "NOTIFYBOT_MAX_PUSH_ATTEMPTS")? {
            notify.history = notify.history.clone().with_max_push_attempts(attempts);
        }

        let commit_url = var("NOTIFYBOT_COMMIT_URL");
        if let Some(directory) = var("NOTIFYBOT_JSON_DIRECTORY") {
            notify = notify.with_notifier(NotifierConfig::Json {
                name: "json".to_string(),
                directory,
                version: var("NOTIFYBOT_JSON_VERSION").unwrap_or_default(),
                default_build: var("NOTIFYBOT_JSON_BUILD").unwrap_or_else(|| "team".to_string()),
                commit_url: commit_url.clone(),
            });
        }
        if let Some(webhook_url) = var("NOTIFYBOT_SLACK_WEBHOOK_URL") {
            notify = notify.with_notifier(NotifierConfig::Slack {
                name: "slack".to_string(),
                webhook_url,
                username: var("NOTIFYBOT_SLACK_USERNAME"),
                commit_url,
            });
        }

        if let Some(secs) = parse_var(&var, "NOTIFYBOT_POLL_INTERVAL")? {
            notify.engine.poll_interval_secs = secs;
        }
        if let Some(dir) = var("NOTIFYBOT_SCRATCH_DIR") {
            notify.engine.scratch_dir = dir;
        }

        Ok(Self { notify, log_level })
    }

    /// Validate the configuration
    ///
    /// On top of [`NotifyConfig::validate`] this checks the ranges the
    /// daemon is willing to run with.
    fn validate(&self) -> Result<()> {
        self.notify.validate()?;

        if self.notify.repository.url.is_empty() || self.notify.repository.local_path.is_empty() {
            anyhow::bail!("The repository needs both a remote URL and a local mirror path");
        }

        if self.notify.notifiers.is_empty() {
            anyhow::bail!(
                "No notifier configured. \
                Set NOTIFYBOT_JSON_DIRECTORY or NOTIFYBOT_SLACK_WEBHOOK_URL"
            );
        }

        let interval = self.notify.engine.poll_interval_secs;
        if !(10..=3600).contains(&interval) {
            anyhow::bail!(
                "NOTIFYBOT_POLL_INTERVAL must be between 10 and 3600 seconds. Got: {}",
                interval
            );
        }

        let attempts = self.notify.history.max_push_attempts;
        if attempts > 100 {
            anyhow::bail!(
                "NOTIFYBOT_MAX_PUSH_ATTEMPTS must be between 1 and 100. Got: {}",
                attempts
            );
        }

        if let Some(slack) = self.notify.notifiers.iter().find_map(|n| match n {
            NotifierConfig::Slack { webhook_url, .. } => Some(webhook_url),
            _ => None,
        }) && !slack.starts_with("https://")
            && !slack.starts_with("http://")
        {
            // the URL itself is a secret and stays out of the message
            anyhow::bail!("NOTIFYBOT_SLACK_WEBHOOK_URL must use HTTP or HTTPS scheme");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "NOTIFYBOT_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number. Got: {}", key, value))
        })
        .transpose()
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return NotifyExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return NotifyExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return NotifyExitCode::ConfigError.into();
    }

    info!("Starting notifybotd daemon");
    info!(
        "Configuration loaded: {} with {} notifier(s)",
        config.notify.repository.name,
        config.notify.notifiers.len()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NotifyExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(config.notify).await {
            error!("Daemon error: {:#}", e);
            NotifyExitCode::RuntimeError
        } else {
            NotifyExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Build the registry with every compiled-in plugin
fn registry() -> NotifierRegistry {
    let registry = NotifierRegistry::with_builtin_stores();

    info!("Registering git history store");
    notifybot_git::register(&registry);

    #[cfg(feature = "json")]
    {
        info!("Registering JSON notifier");
        notifybot_json::register(&registry);
    }

    #[cfg(feature = "slack")]
    {
        info!("Registering Slack notifier");
        notifybot_slack::register(&registry);
    }

    registry
}

/// Run the daemon
async fn run_daemon(config: NotifyConfig) -> Result<()> {
    let registry = registry();

    let notifiers = registry.create_notifiers(&config.notifiers)?;
    if matches!(config.history.store, HistoryStoreConfig::Memory) {
        warn!("History is kept in memory and lost on restart");
    }
    let store = registry.create_store(&config.history.store)?;
    let history = UpdateHistory::open(store, &config.history).await?;
    let repository = GitRepository::open(
        config.repository.name.clone(),
        config.repository.url.clone(),
        &config.repository.local_path,
    )
    .await?;

    let (engine, events) = NotifyEngine::new(Box::new(repository), history, notifiers, config)?;
    let monitor = tokio::spawn(log_events(events));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Shutdown error: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    info!("Daemon initialized successfully");
    engine.run_with_shutdown(shutdown_rx).await?;

    // closing the channel ends the monitor
    drop(engine);
    let _ = monitor.await;
    info!("Shutting down daemon");
    Ok(())
}

/// Log engine events that the engine itself only reports once
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::DeliveryFailed {
                notifier,
                kind,
                subject,
                error,
                will_retry,
            } => warn!(
                "{} failed on {:?} event {}: {} (retry: {})",
                notifier, kind, subject, error, will_retry
            ),
            EngineEvent::CycleFinished {
                delivered,
                failed,
                errors,
            } if failed > 0 || errors > 0 => warn!(
                "Cycle finished with {} delivered, {} failed, {} error(s)",
                delivered, failed, errors
            ),
            other => debug!("Engine event: {:?}", other),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
