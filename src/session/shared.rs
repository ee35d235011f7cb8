use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::events::{LogoutReason, Navigator, SessionEvent};
use crate::error::SessionError;
use crate::interceptor::AuthFailureHandler;
use crate::models::User;
use crate::store::TokenStore;
use crate::utils::BackgroundTask;

/// Snapshot of the authentication state a view renders from.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: Option<User>,
    pub loading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Loading,
    Authenticated,
    Anonymous,
}

impl Session {
    pub fn status(&self) -> AuthStatus {
        match (&self.user, self.loading) {
            (Some(_), _) => AuthStatus::Authenticated,
            (None, true) => AuthStatus::Loading,
            (None, false) => AuthStatus::Anonymous,
        }
    }
}

/// State shared between the session context, its background task and the
/// interceptor chain (as its [`AuthFailureHandler`]).
pub struct SessionShared {
    session: RwLock<Session>,
    /// Bumped on every logout; work started under an older epoch is stale.
    epoch: AtomicU64,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    /// Set once the login redirect fired; re-armed by a successful login.
    redirected: AtomicBool,
    proactive: Mutex<Option<BackgroundTask>>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    pub fn new(store: Arc<dyn TokenStore>, navigator: Arc<dyn Navigator>) -> Self {
        let (events, _) = broadcast::channel(64);
        SessionShared {
            session: RwLock::new(Session {
                user: None,
                loading: true,
            }),
            epoch: AtomicU64::new(0),
            store,
            navigator,
            redirected: AtomicBool::new(false),
            proactive: Mutex::new(None),
            events,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Session {
        self.session.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Install `user` unless the session was ended since `epoch` was read.
    pub async fn apply_user(&self, epoch: u64, user: User) -> bool {
        let mut session = self.session.write().await;
        if self.epoch() != epoch {
            debug!("Discarding profile fetched for an ended session");
            return false;
        }
        session.user = Some(user);
        session.loading = false;
        true
    }

    pub async fn finish_loading(&self) {
        self.session.write().await.loading = false;
    }

    pub fn rearm_redirect(&self) {
        self.redirected.store(false, Ordering::SeqCst);
    }

    pub fn set_proactive(&self, task: Option<BackgroundTask>) {
        let previous = match self.proactive.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, task),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), task),
        };
        drop(previous);
    }

    pub fn has_proactive(&self) -> bool {
        self.proactive
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Tear the session down: tokens, user, background refresh, and one
    /// redirect to login. Safe to call any number of times.
    pub async fn end_session(&self, reason: LogoutReason) {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear stored tokens on logout: {}", e);
        }

        let had_user = {
            let mut session = self.session.write().await;
            session.loading = false;
            session.user.take().is_some()
        };

        let navigate = !self.redirected.swap(true, Ordering::SeqCst);
        if navigate {
            info!(
                event_name = "session.ended",
                event_domain = "session",
                reason = ?reason,
                "Session ended; redirecting to login"
            );
            self.navigator.navigate_to_login();
        }
        if had_user || navigate {
            self.emit(SessionEvent::LoggedOut(reason));
        }

        // Last: this may abort the task we are running on.
        self.set_proactive(None);
    }
}

#[async_trait]
impl AuthFailureHandler for SessionShared {
    async fn on_auth_failure(&self, reason: &SessionError) {
        self.end_session(LogoutReason::from(reason)).await;
    }
}
