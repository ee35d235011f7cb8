use tracing::warn;

use crate::error::SessionError;
use crate::models::User;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    /// A request was still rejected after refresh-and-retry.
    Unauthorized,
    /// The refresh token was missing or refused.
    RefreshFailed,
}

impl From<&SessionError> for LogoutReason {
    fn from(e: &SessionError) -> Self {
        match e {
            SessionError::RefreshFailed(_) | SessionError::NoRefreshToken => {
                LogoutReason::RefreshFailed
            }
            _ => LogoutReason::Unauthorized,
        }
    }
}

/// Published on the session's broadcast channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    LoggedIn(User),
    ProfileUpdated(User),
    TokenRefreshed,
    LoggedOut(LogoutReason),
}

/// The host's way of sending the user to the login entry point.
pub trait Navigator: Send + Sync {
    fn navigate_to_login(&self);
}

/// Default navigator for headless hosts: it can only say so in the log.
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate_to_login(&self) {
        warn!(
            event_name = "session.login_required",
            event_domain = "session",
            "Session ended; the user must log in again"
        );
    }
}
