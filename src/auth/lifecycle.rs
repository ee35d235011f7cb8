//! Access-token lifecycle: expiry checks and the single coordinated refresh.
//!
//! At most one call to the refresh endpoint is in flight at any time. Callers
//! that arrive while a refresh is running share its outcome through a
//! [`Shared`] future instead of queueing retries of their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::claims::decode_claims;
use crate::error::{RefreshCause, SessionError};
use crate::models::{TokenKind, TokenPair};
use crate::store::TokenStore;

type RefreshFuture = Shared<BoxFuture<'static, Result<String, SessionError>>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

/// Clears the in-flight slot when the refresh future finishes or is
/// dropped, whichever happens first.
struct InFlightGuard {
    slot: Arc<Mutex<Option<InFlight>>>,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let finished = match self.slot.lock() {
            Ok(mut slot) if slot.as_ref().map(|f| f.id) == Some(self.id) => slot.take(),
            Ok(_) => None,
            Err(poisoned) => poisoned.into_inner().take(),
        };
        // Dropped outside the lock.
        drop(finished);
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// Current time in epoch seconds.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// True if the token's `exp` is at or before `now`. Anything that cannot be
/// decoded counts as expired.
pub fn is_expired(token: &str, now: i64) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims.exp <= now,
        Err(e) => {
            debug!("Treating undecodable access token as expired: {}", e);
            true
        }
    }
}

/// True if the token expires within `threshold_secs` of `now`. Fails closed
/// like [`is_expired`].
pub fn expires_within(token: &str, threshold_secs: i64, now: i64) -> bool {
    match decode_claims(token) {
        Ok(claims) => claims.exp.saturating_sub(now) <= threshold_secs,
        Err(e) => {
            debug!("Treating undecodable access token as expiring: {}", e);
            true
        }
    }
}

pub struct TokenLifecycle {
    http: reqwest::Client,
    refresh_url: String,
    store: Arc<dyn TokenStore>,
    lookahead_secs: i64,
    inflight: Arc<Mutex<Option<InFlight>>>,
    next_id: AtomicU64,
    network_refreshes: AtomicU64,
}

impl TokenLifecycle {
    pub fn new(
        http: reqwest::Client,
        refresh_url: impl Into<String>,
        store: Arc<dyn TokenStore>,
        lookahead_secs: i64,
    ) -> Self {
        TokenLifecycle {
            http,
            refresh_url: refresh_url.into(),
            store,
            lookahead_secs,
            inflight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
            network_refreshes: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// How many refreshes this instance has started. Joined callers do not
    /// count.
    pub fn refresh_count(&self) -> u64 {
        self.network_refreshes.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        self.inflight.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Obtain a new access token, joining a refresh that is already running.
    pub async fn refresh(&self) -> Result<String, SessionError> {
        let future = {
            let mut slot = match self.inflight.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            match slot.as_ref() {
                Some(inflight) => {
                    debug!(refresh_id = inflight.id, "Joining in-flight token refresh");
                    inflight.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    let guard = InFlightGuard {
                        slot: self.inflight.clone(),
                        id,
                    };
                    let future = perform_refresh(
                        self.http.clone(),
                        self.refresh_url.clone(),
                        self.store.clone(),
                        guard,
                    )
                    .boxed()
                    .shared();
                    self.network_refreshes.fetch_add(1, Ordering::SeqCst);
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    /// Return a usable access token, refreshing first if the stored one is
    /// expired or will expire within the configured lookahead.
    pub async fn ensure_valid(&self) -> Result<String, SessionError> {
        self.ensure_valid_at(now_secs()).await
    }

    pub async fn ensure_valid_at(&self, now: i64) -> Result<String, SessionError> {
        let token = self
            .store
            .get(TokenKind::Access)
            .await
            .ok_or(SessionError::NoAccessToken)?;

        if !is_expired(&token, now) && !expires_within(&token, self.lookahead_secs, now) {
            return Ok(token);
        }

        info!(
            lookahead_secs = self.lookahead_secs,
            "Access token expired or expiring soon; refreshing"
        );
        self.refresh().await
    }
}

async fn perform_refresh(
    http: reqwest::Client,
    refresh_url: String,
    store: Arc<dyn TokenStore>,
    guard: InFlightGuard,
) -> Result<String, SessionError> {
    let _guard = guard;

    let refresh_token = match store.get(TokenKind::Refresh).await {
        Some(token) => token,
        None => {
            warn!("Refresh requested but no refresh token is stored");
            return Err(SessionError::NoRefreshToken);
        }
    };

    match call_refresh_endpoint(&http, &refresh_url, &refresh_token).await {
        Ok(response) => {
            let stored = match response.refresh {
                Some(rotated) => store.set(&TokenPair::new(response.access.clone(), rotated)).await,
                None => store.set_access(&response.access).await,
            };
            if let Err(e) = stored {
                warn!("Refreshed token could not be stored: {}", e);
                clear_tokens(store.as_ref()).await;
                return Err(SessionError::RefreshFailed(RefreshCause::Storage(e)));
            }
            info!(
                event_name = "auth.refresh.succeeded",
                event_domain = "auth",
                "Access token refreshed"
            );
            Ok(response.access)
        }
        Err(cause) => {
            warn!(
                event_name = "auth.refresh.failed",
                event_domain = "auth",
                error = %cause,
                "Token refresh failed; clearing stored tokens"
            );
            clear_tokens(store.as_ref()).await;
            Err(SessionError::RefreshFailed(cause))
        }
    }
}

async fn call_refresh_endpoint(
    http: &reqwest::Client,
    refresh_url: &str,
    refresh_token: &str,
) -> Result<RefreshResponse, RefreshCause> {
    let response = http
        .post(refresh_url)
        .json(&json!({ "refresh": refresh_token }))
        .send()
        .await
        .map_err(|e| RefreshCause::Network(Arc::new(e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RefreshCause::Rejected {
            status: status.as_u16(),
        });
    }

    response
        .json::<RefreshResponse>()
        .await
        .map_err(|e| RefreshCause::InvalidResponse(e.to_string()))
}

async fn clear_tokens(store: &dyn TokenStore) {
    if let Err(e) = store.clear().await {
        warn!("Failed to clear stored tokens: {}", e);
    }
}
