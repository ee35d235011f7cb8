use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::feed::NotificationFeed;
use crate::config::NotificationsConfig;
use crate::error::SessionError;
use crate::interceptor::{ApiClient, ApiRequest};
use crate::models::{NotificationId, NotificationPage, TokenKind};
use crate::session::SessionShared;
use crate::utils::{BackgroundTask, LogThrottle};

/// Keeps the [`NotificationFeed`] in sync with the REST API on a fixed
/// timer. Failures never propagate out of `load`/`poll`; they are recorded
/// on the feed and the previous data stays visible. Responses that arrive
/// after the session ended are discarded.
pub struct NotificationPoller {
    api: Arc<ApiClient>,
    session: Arc<SessionShared>,
    feed: Arc<NotificationFeed>,
    config: NotificationsConfig,
    task: Mutex<Option<BackgroundTask>>,
    throttle: LogThrottle,
}

impl NotificationPoller {
    pub fn new(
        api: Arc<ApiClient>,
        session: Arc<SessionShared>,
        feed: Arc<NotificationFeed>,
        config: NotificationsConfig,
    ) -> Self {
        NotificationPoller {
            api,
            session,
            feed,
            config,
            task: Mutex::new(None),
            throttle: LogThrottle::new(Duration::from_secs(300)),
        }
    }

    pub fn feed(&self) -> &Arc<NotificationFeed> {
        &self.feed
    }

    fn path(&self, suffix: &str) -> String {
        format!(
            "{}/{}",
            self.api.api_config().notifications_path.trim_end_matches('/'),
            suffix
        )
    }

    fn list_request(&self, unread_only: bool) -> ApiRequest {
        let mut request = ApiRequest::get(self.path("mine/"));
        if unread_only {
            request = request.query("is_read", "false");
        }
        request.query("limit", self.config.poll_limit)
    }

    async fn authenticated(&self) -> bool {
        self.api.tokens().store().get(TokenKind::Access).await.is_some()
    }

    /// False once the session that was current at `epoch` has ended.
    fn still_current(&self, epoch: u64) -> bool {
        if self.session.epoch() == epoch {
            return true;
        }
        debug!("Discarding notifications fetched for an ended session");
        false
    }

    /// Fetch the list and the unread count together and replace the feed.
    pub async fn load(&self) {
        let epoch = self.session.epoch();
        if !self.authenticated().await {
            debug!("Skipping notification load; no session");
            return;
        }

        let all = self.list_request(false);
        let unread = self.list_request(true);
        let (all, unread) = tokio::join!(
            self.api.fetch::<NotificationPage>(&all),
            self.api.fetch::<NotificationPage>(&unread),
        );
        if !self.still_current(epoch) {
            return;
        }

        match (all, unread) {
            (Ok(all), Ok(unread)) => {
                let items = all.into_items();
                let unread_count = unread.into_items().len() as u32;
                info!(
                    event_name = "notifications.loaded",
                    event_domain = "notifications",
                    count = items.len(),
                    unread_count,
                    "Notifications loaded"
                );
                self.feed.replace(items, unread_count);
                self.throttle.reset("notifications.load_failed");
            }
            (Err(e), _) | (_, Err(e)) => self.record_failure("notifications.load_failed", e),
        }
    }

    /// Fetch unread notifications and merge the ones not seen before.
    /// Returns how many new unread notifications arrived.
    pub async fn poll(&self) -> u32 {
        let epoch = self.session.epoch();
        if !self.authenticated().await {
            debug!("Skipping notification poll; no session");
            return 0;
        }

        let result = self
            .api
            .fetch::<NotificationPage>(&self.list_request(true))
            .await;
        if !self.still_current(epoch) {
            return 0;
        }

        match result {
            Ok(page) => {
                let added = self.feed.merge_new(page.into_items());
                if added > 0 {
                    info!(
                        event_name = "notifications.received",
                        event_domain = "notifications",
                        added,
                        "New notifications"
                    );
                }
                self.feed.clear_error();
                self.throttle.reset("notifications.poll_failed");
                added
            }
            Err(e) => {
                self.record_failure("notifications.poll_failed", e);
                0
            }
        }
    }

    /// Mark one notification read. The feed changes before the request is
    /// sent and is not rolled back if the request fails.
    pub async fn mark_read(&self, id: NotificationId) -> Result<(), SessionError> {
        self.feed.mark_read(id);
        let request = ApiRequest::post(self.path(&format!("{}/mark-read/", id)));
        self.confirm("notifications.mark_read_failed", &request).await
    }

    /// Mark everything read, optimistically.
    pub async fn mark_all_read(&self) -> Result<(), SessionError> {
        let flipped = self.feed.mark_all_read();
        debug!(flipped, "Marked all notifications read locally");
        let request = ApiRequest::post(self.path("mark-all-read/"));
        self.confirm("notifications.mark_all_read_failed", &request).await
    }

    /// Remove a notification, optimistically.
    pub async fn delete(&self, id: NotificationId) -> Result<(), SessionError> {
        self.feed.remove(id);
        let request = ApiRequest::delete(self.path(&format!("{}/", id)));
        self.confirm("notifications.delete_failed", &request).await
    }

    async fn confirm(&self, key: &'static str, request: &ApiRequest) -> Result<(), SessionError> {
        match self.api.send(request).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // The local change stays; client and server may now disagree
                // until the next load.
                self.record_failure(key, e.clone());
                Err(e)
            }
        }
    }

    fn record_failure(&self, key: &'static str, error: SessionError) {
        if let Some(suppressed) = self.throttle.should_emit(key) {
            warn!(
                event_name = key,
                event_domain = "notifications",
                suppressed,
                "Notification request failed: {}",
                error
            );
        }
        self.feed.record_error(error);
    }

    /// Start polling every `poll_interval_secs`. Restarting replaces the
    /// previous timer.
    pub fn start(self: &Arc<Self>) {
        let poller = Arc::downgrade(self);
        let task = BackgroundTask::every(
            "notifications.poll",
            Duration::from_secs(self.config.poll_interval_secs),
            move || {
                let poller = poller.clone();
                async move {
                    if let Some(poller) = poller.upgrade() {
                        poller.poll().await;
                    }
                }
            },
        );
        self.replace_task(Some(task));
    }

    pub fn stop(&self) {
        self.replace_task(None);
    }

    pub fn is_running(&self) -> bool {
        match self.task.lock() {
            Ok(slot) => slot.as_ref().is_some_and(|t| !t.is_finished()),
            Err(_) => false,
        }
    }

    fn replace_task(&self, task: Option<BackgroundTask>) {
        let previous = match self.task.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, task),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), task),
        };
        drop(previous);
    }
}

impl Drop for NotificationPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
