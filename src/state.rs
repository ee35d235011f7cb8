//! Shared application state.
//!
//! Everything the agent needs after bootstrap, built once from the
//! configuration and passed around by reference.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::config::ConfigV1;
use crate::error::SessionError;
use crate::notifications::{NotificationFeed, NotificationPoller, RealtimeChannel};
use crate::session::{Navigator, SessionContext, SessionEvent};
use crate::store::TokenStore;
use crate::utils::BackgroundTask;

#[derive(Clone)]
pub struct AppState {
    /// Configuration loaded at startup.
    pub config: Arc<ConfigV1>,
    /// Authentication state and the authenticated API client.
    pub session: Arc<SessionContext>,
    /// Notification list shared by the poller and the realtime channel.
    pub feed: Arc<NotificationFeed>,
    pub poller: Arc<NotificationPoller>,
    pub channel: Arc<RealtimeChannel>,
    /// Stops notifications whenever the session ends.
    _teardown: Arc<BackgroundTask>,
}

impl AppState {
    /// Must be called from within a tokio runtime.
    pub fn build(
        config: Arc<ConfigV1>,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, SessionError> {
        let session = Arc::new(SessionContext::new(&config, store.clone(), navigator)?);
        let feed = Arc::new(NotificationFeed::new());
        let poller = Arc::new(NotificationPoller::new(
            session.api(),
            session.shared(),
            feed.clone(),
            config.notifications.clone(),
        ));
        let channel = Arc::new(RealtimeChannel::new(
            &config.notifications,
            store,
            feed.clone(),
        )?);
        let teardown = Arc::new(BackgroundTask::spawn(
            "session.teardown",
            stop_on_logout(
                session.subscribe(),
                feed.clone(),
                poller.clone(),
                channel.clone(),
            ),
        ));

        Ok(AppState {
            config,
            session,
            feed,
            poller,
            channel,
            _teardown: teardown,
        })
    }
}

async fn stop_on_logout(
    mut events: broadcast::Receiver<SessionEvent>,
    feed: Arc<NotificationFeed>,
    poller: Arc<NotificationPoller>,
    channel: Arc<RealtimeChannel>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::LoggedOut(reason)) => {
                info!(
                    event_name = "notifications.stopped",
                    event_domain = "notifications",
                    reason = ?reason,
                    "Session ended; stopping notifications"
                );
                poller.stop();
                channel.disconnect().await;
                feed.reset();
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Teardown missed session events"),
            Err(RecvError::Closed) => break,
        }
    }
}
