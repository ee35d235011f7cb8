//! Error taxonomy for the session layer.
//!
//! Every variant is `Clone` so that the outcome of a single coordinated token
//! refresh can be handed to each caller that was waiting on it.

use std::sync::Arc;

use thiserror::Error;

/// Why a refresh attempt failed.
#[derive(Error, Debug, Clone)]
pub enum RefreshCause {
    /// The refresh endpoint could not be reached.
    #[error("refresh request failed: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    /// The refresh endpoint answered with a non-2xx status.
    #[error("refresh rejected with status {status}")]
    Rejected { status: u16 },

    /// The refresh endpoint answered 2xx but the body had no usable token.
    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    /// The new token could not be persisted.
    #[error("could not persist refreshed token: {0}")]
    Storage(String),
}

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("no access token stored")]
    NoAccessToken,

    #[error("no refresh token stored")]
    NoRefreshToken,

    #[error("token refresh failed: {0}")]
    RefreshFailed(#[source] RefreshCause),

    /// A 401 that survived the refresh-and-retry path.
    #[error("unauthorized")]
    Unauthorized,

    /// No response was received at all.
    #[error("network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("realtime channel gave up after {attempts} reconnect attempts")]
    ChannelFatal { attempts: u32 },

    /// Any non-401 HTTP error, passed through untouched.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("account not verified: {detail}")]
    Unverified {
        detail: String,
        resend_verification: bool,
    },

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("token storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SessionError::Decode(e.to_string())
        } else {
            SessionError::Network(Arc::new(e))
        }
    }
}

impl SessionError {
    /// True for the errors that mean the server no longer accepts this session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            SessionError::Unauthorized
                | SessionError::RefreshFailed(_)
                | SessionError::NoRefreshToken
                | SessionError::NoAccessToken
        )
    }
}
