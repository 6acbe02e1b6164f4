//! Notification dispatcher.
//!
//! Polls the outbox on a fixed interval. Each cycle keeps claiming batches
//! until one comes back empty, and each batch is fanned out to a fixed pool
//! of workers over a work channel, with results fanned back in over a result
//! channel. Cancelling the dispatcher stops new batches from being taken but
//! an in-flight batch always drains.

use crate::channels::{ChannelError, ChannelRegistry};
use crate::resilience::Resilience;
use crate::rules::{select_settings, RuleContext};
use chrono::Utc;
use faultline_core::DispatcherConfig;
use faultline_database::repositories::{
    IssuesRepository, NotificationSettingsRepository, NotificationWithSettings,
    NotificationsQueueRepository, ProjectsRepository, RepositoryError, SeaIssuesRepository,
    SeaNotificationSettingsRepository, SeaNotificationsQueueRepository, SeaProjectsRepository,
    SeaUsersRepository, UsersRepository,
};
use faultline_entities::types::{EventLevel, EventSource, IssueStatus, NotificationType};
use faultline_entities::{issues, projects};
use futures::future::join_all;
use futures::FutureExt;
use sea_orm::DatabaseConnection;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const REASON_ISSUE_NOT_FOUND: &str = "issue not found";
pub const REASON_PROJECT_NOT_FOUND: &str = "project not found";
pub const REASON_NO_SETTINGS: &str = "no settings";
pub const REASON_RECIPIENT_NOT_FOUND: &str = "recipient not found";
pub const REASON_NO_PERSONAL_CHANNEL: &str = "no channel can address the recipient";

#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Notification setting {0} not found")]
    SettingNotFound(i32),

    #[error("No channel registered for {0}")]
    ChannelNotRegistered(NotificationType),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Terminal state reached by one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub notification_id: i32,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub batches: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl CycleStats {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Failed(_) => self.failed += 1,
            DispatchOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.sent + self.failed + self.skipped
    }
}

/// Repository contracts the dispatcher reads and writes through
#[derive(Clone)]
pub struct DispatcherRepositories {
    pub issues: Arc<dyn IssuesRepository>,
    pub projects: Arc<dyn ProjectsRepository>,
    pub settings: Arc<dyn NotificationSettingsRepository>,
    pub queue: Arc<dyn NotificationsQueueRepository>,
    pub users: Arc<dyn UsersRepository>,
}

impl DispatcherRepositories {
    pub fn sea_orm(db: Arc<DatabaseConnection>, claim_timeout: Duration) -> Self {
        Self {
            issues: Arc::new(SeaIssuesRepository::new(db.clone())),
            projects: Arc::new(SeaProjectsRepository::new(db.clone())),
            settings: Arc::new(SeaNotificationSettingsRepository::new(db.clone())),
            users: Arc::new(SeaUsersRepository::new(db.clone())),
            queue: Arc::new(SeaNotificationsQueueRepository::new(db, claim_timeout)),
        }
    }
}

struct Inner {
    repos: DispatcherRepositories,
    channels: ChannelRegistry,
    resilience: Resilience,
    config: DispatcherConfig,
}

type WorkReceiver = Arc<Mutex<mpsc::Receiver<NotificationWithSettings>>>;

#[derive(Clone)]
pub struct NotificationDispatcher {
    inner: Arc<Inner>,
}

/// Running dispatcher loop
pub struct DispatcherHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop scheduling cycles and wait for the in-flight batch to drain
    pub async fn stop(self) -> Result<(), JoinError> {
        self.token.cancel();
        self.join.await
    }
}

impl NotificationDispatcher {
    pub fn new(
        repos: DispatcherRepositories,
        channels: ChannelRegistry,
        resilience: Resilience,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repos,
                channels,
                resilience,
                config,
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn resilience(&self) -> &Resilience {
        &self.inner.resilience
    }

    /// Spawn the polling loop
    pub fn start(&self) -> DispatcherHandle {
        self.start_with_token(CancellationToken::new())
    }

    pub fn start_with_token(&self, token: CancellationToken) -> DispatcherHandle {
        let dispatcher = self.clone();
        let loop_token = token.clone();
        let join = tokio::spawn(async move { dispatcher.run(loop_token).await });
        DispatcherHandle { token, join }
    }

    /// Poll until `token` is cancelled. The first cycle runs immediately.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            interval_secs = self.inner.config.interval.as_secs(),
            batch_size = self.inner.config.batch_size,
            workers = self.inner.config.effective_workers(),
            "Notification dispatcher started"
        );

        let mut ticker = tokio::time::interval(self.inner.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.drain(Some(&token)).await {
                Ok(stats) if stats.total() > 0 => info!(
                    batches = stats.batches,
                    sent = stats.sent,
                    failed = stats.failed,
                    skipped = stats.skipped,
                    "Dispatch cycle finished"
                ),
                Ok(_) => debug!("Dispatch cycle found no pending notifications"),
                Err(e) => error!(error = %e, "Dispatch cycle aborted"),
            }
        }

        info!("Notification dispatcher stopped");
    }

    /// Claim and process batches until the outbox is empty
    pub async fn run_cycle(&self) -> Result<CycleStats, DispatcherError> {
        self.drain(None).await
    }

    async fn drain(&self, token: Option<&CancellationToken>) -> Result<CycleStats, DispatcherError> {
        let mut stats = CycleStats::default();
        loop {
            if token.is_some_and(|t| t.is_cancelled()) {
                debug!("Dispatcher cancelled, not taking another batch");
                break;
            }

            let batch = self
                .inner
                .repos
                .queue
                .take_pending(self.inner.config.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }

            stats.batches += 1;
            for result in self.process_batch(batch).await {
                stats.record(&result.outcome);
            }
        }
        Ok(stats)
    }

    /// Fan a batch out to the worker pool and collect one result per item
    pub async fn process_batch(&self, batch: Vec<NotificationWithSettings>) -> Vec<DispatchResult> {
        let expected = batch.len();
        if expected == 0 {
            return Vec::new();
        }
        let workers = self.inner.config.effective_workers().min(expected);

        let (work_tx, work_rx) = mpsc::channel::<NotificationWithSettings>(expected);
        let work_rx: WorkReceiver = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<DispatchResult>(expected);

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| {
                let inner = self.inner.clone();
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                tokio::spawn(async move { inner.work(worker, work_rx, result_tx).await })
            })
            .collect();

        let coordinator = tokio::spawn(async move {
            for item in batch {
                if work_tx.send(item).await.is_err() {
                    break;
                }
            }
            drop(work_tx);

            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    error!(error = %e, "Dispatcher worker terminated abnormally");
                }
            }
            drop(result_tx);
        });

        let mut results = Vec::with_capacity(expected);
        while let Some(result) = result_rx.recv().await {
            results.push(result);
        }
        if let Err(e) = coordinator.await {
            error!(error = %e, "Dispatcher coordinator terminated abnormally");
        }
        if results.len() != expected {
            warn!(
                expected,
                received = results.len(),
                "Batch finished with unprocessed notifications; they will be reclaimed"
            );
        }
        results
    }

    /// Send a synthetic notification through one setting, bypassing the
    /// outbox and the circuit breaker
    pub async fn send_test_notification(&self, setting_id: i32) -> Result<(), DispatcherError> {
        let setting = self
            .inner
            .repos
            .settings
            .get_setting_by_id(setting_id)
            .await?
            .ok_or(DispatcherError::SettingNotFound(setting_id))?;
        let channel_type = setting.setting.notification_type;
        let channel = self
            .inner
            .channels
            .get(channel_type)
            .ok_or(DispatcherError::ChannelNotRegistered(channel_type))?;

        let (issue, project) = test_subjects(setting.setting.project_id);
        channel
            .send(&issue, &project, &setting.config(), false)
            .await?;

        info!(setting_id, channel = %channel_type, "Test notification sent");
        Ok(())
    }
}

impl Inner {
    async fn work(
        self: Arc<Self>,
        worker: usize,
        work_rx: WorkReceiver,
        results: mpsc::Sender<DispatchResult>,
    ) {
        loop {
            let next = {
                let mut receiver = work_rx.lock().await;
                receiver.recv().await
            };
            let Some(item) = next else {
                break;
            };

            let result = self.dispatch(item).await;
            if results.send(result).await.is_err() {
                break;
            }
        }
        debug!(worker, "Dispatcher worker finished");
    }

    async fn dispatch(&self, item: NotificationWithSettings) -> DispatchResult {
        let notification_id = item.notification.id;
        // the batch was claimed at once; restart the timeout now that this row is picked up
        if let Err(e) = self.repos.queue.renew_claim(notification_id).await {
            warn!(notification_id, error = %e, "Failed to renew notification claim");
        }

        let outcome = match AssertUnwindSafe(self.process_one(&item)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(notification_id, "Notification processing panicked");
                DispatchOutcome::Failed("internal error while processing notification".to_string())
            }
        };

        match &outcome {
            DispatchOutcome::Sent => debug!(notification_id, "Notification sent"),
            DispatchOutcome::Failed(reason) => {
                warn!(notification_id, reason = %reason, "Notification failed")
            }
            DispatchOutcome::Skipped(reason) => {
                info!(notification_id, reason = %reason, "Notification skipped")
            }
        }

        if let Err(e) = self.record(notification_id, &outcome).await {
            // the row stays claimed and is retaken after the claim timeout
            error!(notification_id, error = %e, "Failed to record notification status");
        }

        DispatchResult {
            notification_id,
            outcome,
        }
    }

    async fn record(&self, id: i32, outcome: &DispatchOutcome) -> Result<(), RepositoryError> {
        let queue = &self.repos.queue;
        match outcome {
            DispatchOutcome::Sent => queue.mark_as_sent(id).await,
            DispatchOutcome::Failed(reason) => queue.mark_as_failed(id, reason).await,
            DispatchOutcome::Skipped(reason) => queue.mark_as_skipped(id, reason).await,
        }
    }

    async fn process_one(&self, item: &NotificationWithSettings) -> DispatchOutcome {
        let notification = &item.notification;

        let issue = match self.repos.issues.get_by_id(notification.issue_id).await {
            Ok(Some(issue)) => issue,
            Ok(None) => return DispatchOutcome::Skipped(REASON_ISSUE_NOT_FOUND.to_string()),
            Err(e) => return DispatchOutcome::Failed(format!("issue lookup failed: {e}")),
        };
        let project = match self.repos.projects.get_by_id(notification.project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => return DispatchOutcome::Skipped(REASON_PROJECT_NOT_FOUND.to_string()),
            Err(e) => return DispatchOutcome::Failed(format!("project lookup failed: {e}")),
        };

        let ctx = RuleContext::new(notification).with_fingerprint(&issue.fingerprint);
        let selected = select_settings(&item.settings, &ctx);
        if selected.is_empty() {
            return DispatchOutcome::Skipped(REASON_NO_SETTINGS.to_string());
        }

        // Member rows go to that member alone; shared destinations get the project-wide row
        let recipient = match notification.user_id {
            Some(user_id) => match self.repos.users.get_by_id(user_id).await {
                Ok(Some(user)) => Some(user),
                Ok(None) => return DispatchOutcome::Skipped(REASON_RECIPIENT_NOT_FOUND.to_string()),
                Err(e) => return DispatchOutcome::Failed(format!("recipient lookup failed: {e}")),
            },
            None => None,
        };

        let is_regression = notification.was_reactivated;
        let mut delivered = 0usize;
        let mut failures = Vec::new();

        for setting in selected {
            let channel_type = setting.setting.notification_type;
            let Some(channel) = self.channels.get(channel_type) else {
                warn!(
                    notification_id = notification.id,
                    setting_id = setting.setting.id,
                    channel = %channel_type,
                    "No channel registered for setting"
                );
                failures.push(format!("{channel_type}: no channel registered"));
                continue;
            };

            let config = match &recipient {
                None => setting.config(),
                Some(user) => match channel.address_to(&setting.config(), &user.email) {
                    Some(config) => config,
                    None => continue,
                },
            };
            let (channel, issue_ref, project_ref, config_ref) =
                (channel.as_ref(), &issue, &project, &config);
            let sent = self
                .resilience
                .call(channel_type, move || {
                    channel.send(issue_ref, project_ref, config_ref, is_regression)
                })
                .await;

            match sent {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        notification_id = notification.id,
                        setting_id = setting.setting.id,
                        channel = %channel_type,
                        circuit_open = e.is_circuit_open(),
                        error = %e,
                        "Channel delivery failed"
                    );
                    failures.push(format!("{channel_type}: {e}"));
                }
            }
        }

        if delivered > 0 {
            DispatchOutcome::Sent
        } else if failures.is_empty() {
            DispatchOutcome::Skipped(REASON_NO_PERSONAL_CHANNEL.to_string())
        } else {
            DispatchOutcome::Failed(failures.join("; "))
        }
    }
}

/// Sentinel issue and project used by test notifications
fn test_subjects(project_id: i32) -> (issues::Model, projects::Model) {
    let now = Utc::now();
    let issue = issues::Model {
        id: 0,
        project_id,
        fingerprint: "test-notification".to_string(),
        source: EventSource::Event,
        status: IssueStatus::Unresolved,
        title: "Test notification from Faultline".to_string(),
        level: EventLevel::Info,
        platform: "faultline".to_string(),
        first_seen: now,
        last_seen: now,
        total_events: 1,
        last_notification: None,
        created_at: now,
        updated_at: now,
    };
    let project = projects::Model {
        id: project_id,
        name: "Test project".to_string(),
        slug: "test-project".to_string(),
        team_id: None,
        created_at: now,
        updated_at: now,
    };
    (issue, project)
}

#[cfg(test)]
mod tests {
    include!("dispatcher_tests.rs");
}
