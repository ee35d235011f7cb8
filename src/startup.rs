//! Agent startup: bootstrap the session, then keep notifications flowing
//! until Ctrl-C or until the session ends.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::config::ConfigV1;
use crate::notifications::ChannelEvent;
use crate::session::{AuthStatus, LogNavigator, SessionEvent};
use crate::state::AppState;
use crate::store::create_store;

/// Runs the agent.
///
/// # Errors
///
/// Returns an error if the state cannot be built from the configuration or
/// the configured credentials are rejected.
pub async fn run(config: Arc<ConfigV1>) -> Result<(), Box<dyn std::error::Error>> {
    let store = create_store(&config.store);
    let state = AppState::build(config.clone(), store, Arc::new(LogNavigator))?;
    let mut session_events = state.session.subscribe();

    let mut status = state.session.init().await;
    if status == AuthStatus::Anonymous {
        if let Some(credentials) = &config.credentials {
            info!(username = credentials.username.as_str(), "No stored session; logging in");
            state
                .session
                .login(&credentials.username, &credentials.password)
                .await?;
            status = state.session.status().await;
        }
    }
    if status != AuthStatus::Authenticated {
        warn!("Not authenticated and no credentials configured; nothing to do");
        return Ok(());
    }

    state.poller.load().await;
    state.poller.start();
    let mut channel_events = state.channel.subscribe();
    state.channel.connect();

    let snapshot = state.feed.snapshot();
    info!(
        notifications = snapshot.items.len(),
        unread = snapshot.unread_count,
        "Agent running; press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            event = session_events.recv() => match event {
                Ok(SessionEvent::LoggedOut(reason)) => {
                    warn!(reason = ?reason, "Session ended; stopping");
                    break;
                }
                Ok(SessionEvent::TokenRefreshed) => info!("Access token refreshed"),
                Ok(SessionEvent::ProfileUpdated(user)) | Ok(SessionEvent::LoggedIn(user)) => {
                    info!(user = user.display_name().as_str(), "Profile updated");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed session events"),
                Err(RecvError::Closed) => break,
            },
            event = channel_events.recv() => match event {
                Ok(ChannelEvent::Notification(n)) => info!(
                    event_name = "notifications.pushed",
                    event_domain = "notifications",
                    id = n.id,
                    kind = ?n.kind,
                    unread = state.feed.unread_count(),
                    "{}",
                    n.title
                ),
                Ok(ChannelEvent::UnreadCount(count)) => info!(unread = count, "Unread count updated"),
                Ok(ChannelEvent::Fatal(e)) => {
                    error!("Realtime channel unavailable, relying on polling: {}", e);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed channel events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    state.poller.stop();
    state.channel.disconnect().await;
    info!("Agent stopped");
    Ok(())
}
