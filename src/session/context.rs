//! The session context: the one object the rest of the application talks to
//! about who is logged in.
//!
//! It is created at bootstrap, handed out by reference, and torn down by
//! dropping it. State moves `Loading -> {Authenticated, Anonymous}` exactly
//! once through [`SessionContext::init`]; afterwards only
//! [`login`](SessionContext::login) makes a session and only a logout or an
//! unrecoverable 401 ends one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{LogoutReason, Navigator, SessionEvent};
use super::shared::{AuthStatus, Session, SessionShared};
use crate::auth::{expires_within, is_expired, now_secs, TokenLifecycle};
use crate::config::{ConfigV1, SessionConfig};
use crate::error::SessionError;
use crate::interceptor::{build_http_client, ApiClient, ApiRequest};
use crate::models::{LoginRejection, LoginRequest, LoginResponse, TokenKind, User};
use crate::store::TokenStore;
use crate::utils::BackgroundTask;

pub struct SessionContext {
    shared: Arc<SessionShared>,
    api: Arc<ApiClient>,
    tokens: Arc<TokenLifecycle>,
    store: Arc<dyn TokenStore>,
    config: SessionConfig,
}

impl SessionContext {
    /// Wire the token lifecycle, the interceptor chain and the session state
    /// together around `store`.
    pub fn new(
        config: &ConfigV1,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, SessionError> {
        let http = build_http_client(&config.api)?;
        let tokens = Arc::new(TokenLifecycle::new(
            http.clone(),
            config.api.url(&config.api.refresh_path),
            store.clone(),
            config.session.refresh_lookahead_secs,
        ));
        let shared = Arc::new(SessionShared::new(store.clone(), navigator));
        let api = Arc::new(ApiClient::new(
            http,
            config.api.clone(),
            store.clone(),
            tokens.clone(),
            shared.clone(),
        ));

        Ok(SessionContext {
            shared,
            api,
            tokens,
            store,
            config: config.session.clone(),
        })
    }

    pub fn api(&self) -> Arc<ApiClient> {
        self.api.clone()
    }

    pub fn tokens(&self) -> Arc<TokenLifecycle> {
        self.tokens.clone()
    }

    pub fn store(&self) -> Arc<dyn TokenStore> {
        self.store.clone()
    }

    /// The shared state, for components that must notice a session ending.
    pub fn shared(&self) -> Arc<SessionShared> {
        self.shared.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.subscribe()
    }

    pub async fn snapshot(&self) -> Session {
        self.shared.snapshot().await
    }

    pub async fn status(&self) -> AuthStatus {
        self.shared.snapshot().await.status()
    }

    pub async fn current_user(&self) -> Option<User> {
        self.shared.snapshot().await.user
    }

    /// True while the background refresh check is scheduled.
    pub fn proactive_refresh_running(&self) -> bool {
        self.shared.has_proactive()
    }

    /// Resolve the initial `Loading` state from whatever is in storage.
    pub async fn init(&self) -> AuthStatus {
        if !self.shared.snapshot().await.loading {
            return self.status().await;
        }

        // A long-closed app may come back with an expired access token but a
        // usable refresh token.
        if let Some(access) = self.store.get(TokenKind::Access).await {
            if is_expired(&access, now_secs())
                && self.store.get(TokenKind::Refresh).await.is_some()
            {
                if let Err(e) = self.tokens.ensure_valid().await {
                    info!("Stored session could not be refreshed: {}", e);
                }
            }
        }

        self.check_status().await;
        self.shared.finish_loading().await;

        let status = self.status().await;
        if status == AuthStatus::Authenticated {
            self.start_proactive_refresh();
        }
        info!(status = ?status, "Session initialised");
        status
    }

    /// Load the profile if a non-expired token is stored and no user is
    /// loaded yet. A 401 ends the session; any other failure leaves the
    /// current state alone.
    pub async fn check_status(&self) {
        let has_valid_token = match self.store.get(TokenKind::Access).await {
            Some(token) => !is_expired(&token, now_secs()),
            None => false,
        };
        if !has_valid_token {
            debug!("No valid access token; nothing to check");
            return;
        }
        if self.shared.snapshot().await.user.is_some() {
            return;
        }
        let _ = self.load_profile().await;
    }

    /// Re-fetch the profile to pick up server-side changes.
    pub async fn refresh(&self) -> Result<User, SessionError> {
        self.load_profile().await
    }

    pub async fn logout(&self) {
        self.shared.end_session(LogoutReason::UserRequested).await;
    }

    /// Whether the access token is present and good for at least the short
    /// validity lookahead.
    pub async fn is_token_valid(&self) -> bool {
        match self.store.get(TokenKind::Access).await {
            Some(token) => !expires_within(&token, self.config.validity_lookahead_secs, now_secs()),
            None => false,
        }
    }

    /// The application came back to the foreground (or went away).
    pub async fn on_visibility_change(&self, visible: bool) {
        if !visible {
            return;
        }
        if self.is_token_valid().await {
            debug!("Foregrounded with a valid token; refreshing profile");
            let _ = self.refresh().await;
        } else if self.shared.snapshot().await.user.is_some() {
            proactive_check(&self.tokens, &self.shared, self.config.proactive_window_secs).await;
        }
    }

    /// Exchange credentials for tokens and load the profile.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, SessionError> {
        let body = serde_json::to_value(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
        .map_err(|e| SessionError::Decode(e.to_string()))?;
        let request = ApiRequest::post(self.api.api_config().login_path.clone()).json(body);

        let response: LoginResponse = self.api.fetch(&request).await.map_err(login_error)?;

        self.store
            .set(&response.tokens())
            .await
            .map_err(SessionError::Storage)?;
        self.shared.rearm_redirect();

        let epoch = self.shared.epoch();
        let user = match self.fetch_profile().await {
            Ok(user) => user,
            Err(e) if e.is_auth_failure() => return Err(e),
            Err(e) => match response.user {
                Some(user) => {
                    warn!("Profile fetch after login failed ({}); using login payload", e);
                    user
                }
                None => {
                    if let Err(clear) = self.store.clear().await {
                        warn!("Failed to clear tokens after incomplete login: {}", clear);
                    }
                    return Err(e);
                }
            },
        };

        if !self.shared.apply_user(epoch, user.clone()).await {
            return Err(SessionError::Unauthorized);
        }
        self.start_proactive_refresh();
        info!(
            event_name = "session.logged_in",
            event_domain = "session",
            user = user.display_name().as_str(),
            "Logged in"
        );
        self.shared.emit(SessionEvent::LoggedIn(user.clone()));
        Ok(user)
    }

    async fn fetch_profile(&self) -> Result<User, SessionError> {
        let me = ApiRequest::get(self.api.api_config().me_path.clone());
        self.api.fetch::<User>(&me).await
    }

    async fn load_profile(&self) -> Result<User, SessionError> {
        let epoch = self.shared.epoch();
        match self.fetch_profile().await {
            Ok(user) => {
                if self.shared.apply_user(epoch, user.clone()).await {
                    self.shared.emit(SessionEvent::ProfileUpdated(user.clone()));
                }
                Ok(user)
            }
            Err(e) if e.is_auth_failure() => {
                self.shared.end_session(LogoutReason::from(&e)).await;
                Err(e)
            }
            Err(e) => {
                warn!("Profile fetch failed; keeping current session state: {}", e);
                Err(e)
            }
        }
    }

    fn start_proactive_refresh(&self) {
        let tokens = self.tokens.clone();
        let shared = Arc::downgrade(&self.shared);
        let window = self.config.proactive_window_secs;

        let task = BackgroundTask::every(
            "session.proactive_refresh",
            Duration::from_secs(self.config.check_interval_secs),
            move || {
                let tokens = tokens.clone();
                let shared = shared.clone();
                async move {
                    if let Some(shared) = shared.upgrade() {
                        proactive_check(&tokens, &shared, window).await;
                    }
                }
            },
        );
        self.shared.set_proactive(Some(task));
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.shared.set_proactive(None);
    }
}

/// Refresh ahead of expiry so views do not pay for a reactive 401 round trip.
async fn proactive_check(tokens: &TokenLifecycle, shared: &SessionShared, window_secs: i64) {
    let Some(token) = tokens.store().get(TokenKind::Access).await else {
        return;
    };
    if !expires_within(&token, window_secs, now_secs()) {
        return;
    }

    debug!(window_secs, "Access token close to expiry; refreshing proactively");
    match tokens.refresh().await {
        Ok(_) => shared.emit(SessionEvent::TokenRefreshed),
        Err(e) => {
            warn!("Proactive refresh failed: {}", e);
            shared.end_session(LogoutReason::from(&e)).await;
        }
    }
}

fn login_error(e: SessionError) -> SessionError {
    match e {
        SessionError::Status { status: 403, body } => {
            let rejection: LoginRejection = serde_json::from_str(&body).unwrap_or_default();
            SessionError::Unverified {
                detail: rejection
                    .detail
                    .unwrap_or_else(|| "account not verified".to_string()),
                resend_verification: rejection.resend_verification,
            }
        }
        SessionError::Status { status: 400, body } => {
            let detail = serde_json::from_str::<LoginRejection>(&body)
                .ok()
                .and_then(|r| r.detail)
                .unwrap_or(body);
            SessionError::InvalidCredentials(detail)
        }
        SessionError::Unauthorized => {
            SessionError::InvalidCredentials("invalid username or password".to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::extract_config;
    use crate::models::TokenPair;
    use crate::store::MemoryTokenStore;
    use figment::providers::{Format, Yaml};
    use figment::Figment;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNavigator {
        calls: AtomicUsize,
    }

    impl Navigator for CountingNavigator {
        fn navigate_to_login(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn token_expiring_in(secs: i64) -> String {
        encode(
            &Header::default(),
            &json!({ "exp": now_secs() + secs, "user_id": 7 }),
            &EncodingKey::from_secret(b"k"),
        )
        .unwrap()
    }

    fn config(base_url: &str) -> ConfigV1 {
        let raw = format!(
            r#"
version: "1.0.0"
api:
  base_url: "{}"
store:
  type: memory
notifications:
  ws_url: "ws://127.0.0.1:9/ws/notifications/"
logging:
  level: debug
"#,
            base_url
        );
        extract_config(Figment::new().merge(Yaml::string(&raw))).unwrap()
    }

    fn context(
        base_url: &str,
        tokens: Option<TokenPair>,
    ) -> (SessionContext, Arc<dyn TokenStore>, Arc<CountingNavigator>) {
        let store: Arc<dyn TokenStore> = match tokens {
            Some(pair) => Arc::new(MemoryTokenStore::with_tokens(pair)),
            None => Arc::new(MemoryTokenStore::new()),
        };
        let navigator = Arc::new(CountingNavigator::default());
        let ctx = SessionContext::new(&config(base_url), store.clone(), navigator.clone()).unwrap();
        (ctx, store, navigator)
    }

    const PROFILE: &str = r#"{"id": 7, "username": "ana", "role": "student"}"#;

    #[tokio::test]
    async fn init_without_tokens_is_anonymous() {
        let mut server = Server::new_async().await;
        let me = server.mock("GET", "/auth/me/").expect(0).create_async().await;

        let (ctx, _, navigator) = context(&server.url(), None);
        assert_eq!(ctx.status().await, AuthStatus::Loading);
        assert_eq!(ctx.init().await, AuthStatus::Anonymous);

        me.assert_async().await;
        assert!(!ctx.proactive_refresh_running());
        assert_eq!(navigator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn init_with_valid_token_loads_profile() {
        let mut server = Server::new_async().await;
        let access = token_expiring_in(3_600);
        let me = server
            .mock("GET", "/auth/me/")
            .match_header("authorization", format!("Bearer {}", access).as_str())
            .with_status(200)
            .with_body(PROFILE)
            .expect(1)
            .create_async()
            .await;

        let (ctx, _, _) = context(&server.url(), Some(TokenPair::new(access, "r1")));
        assert_eq!(ctx.init().await, AuthStatus::Authenticated);

        me.assert_async().await;
        assert_eq!(ctx.current_user().await.unwrap().id, 7);
        assert!(ctx.proactive_refresh_running());

        // A second init is a no-op.
        assert_eq!(ctx.init().await, AuthStatus::Authenticated);
    }

    #[tokio::test]
    async fn init_refreshes_an_expired_token_first() {
        let mut server = Server::new_async().await;
        let fresh = token_expiring_in(3_600);
        let refresh = server
            .mock("POST", "/auth/refresh/")
            .match_body(Matcher::Json(json!({"refresh": "r1"})))
            .with_status(200)
            .with_body(json!({ "access": fresh }).to_string())
            .expect(1)
            .create_async()
            .await;
        let me = server
            .mock("GET", "/auth/me/")
            .match_header("authorization", format!("Bearer {}", fresh).as_str())
            .with_status(200)
            .with_body(PROFILE)
            .create_async()
            .await;

        let (ctx, store, _) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(-60), "r1")),
        );
        assert_eq!(ctx.init().await, AuthStatus::Authenticated);

        refresh.assert_async().await;
        me.assert_async().await;
        assert_eq!(store.get(TokenKind::Access).await, Some(fresh));
    }

    #[tokio::test]
    async fn init_with_dead_refresh_token_ends_anonymous() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/refresh/")
            .with_status(401)
            .create_async()
            .await;
        let me = server.mock("GET", "/auth/me/").expect(0).create_async().await;

        let (ctx, store, _) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(-60), "r1")),
        );
        assert_eq!(ctx.init().await, AuthStatus::Anonymous);

        me.assert_async().await;
        assert!(store.get(TokenKind::Refresh).await.is_none());
    }

    #[tokio::test]
    async fn login_stores_tokens_and_announces_user() {
        let mut server = Server::new_async().await;
        let access = token_expiring_in(3_600);
        let login = server
            .mock("POST", "/auth/login/")
            .match_body(Matcher::Json(json!({"username": "ana", "password": "pw"})))
            .with_status(200)
            .with_body(json!({ "access": access, "refresh": "r1" }).to_string())
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/auth/me/")
            .with_status(200)
            .with_body(PROFILE)
            .create_async()
            .await;

        let (ctx, store, _) = context(&server.url(), None);
        ctx.init().await;
        let mut events = ctx.subscribe();

        let user = ctx.login("ana", "pw").await.unwrap();

        login.assert_async().await;
        assert_eq!(user.username.as_deref(), Some("ana"));
        assert_eq!(ctx.status().await, AuthStatus::Authenticated);
        assert_eq!(store.get(TokenKind::Refresh).await.as_deref(), Some("r1"));
        assert!(ctx.proactive_refresh_running());
        assert!(matches!(events.recv().await, Ok(SessionEvent::LoggedIn(u)) if u.id == 7));
    }

    #[tokio::test]
    async fn login_falls_back_to_payload_user() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login/")
            .with_status(200)
            .with_body(
                json!({
                    "access": token_expiring_in(3_600),
                    "refresh": "r1",
                    "user": {"id": 9, "email": "b@uni.edu"}
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/auth/me/")
            .with_status(503)
            .create_async()
            .await;

        let (ctx, _, _) = context(&server.url(), None);
        let user = ctx.login("b", "pw").await.unwrap();
        assert_eq!(user.id, 9);
        assert_eq!(ctx.current_user().await.unwrap().display_name(), "b@uni.edu");
    }

    #[tokio::test]
    async fn unverified_account_is_reported() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login/")
            .with_status(403)
            .with_body(r#"{"detail": "Verify your e-mail", "resend_verification": true}"#)
            .create_async()
            .await;

        let (ctx, store, _) = context(&server.url(), None);
        match ctx.login("c", "pw").await {
            Err(SessionError::Unverified {
                detail,
                resend_verification,
            }) => {
                assert_eq!(detail, "Verify your e-mail");
                assert!(resend_verification);
            }
            other => panic!("expected Unverified, got {:?}", other),
        }
        assert!(store.get(TokenKind::Access).await.is_none());
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/login/")
            .with_status(401)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh/")
            .expect(0)
            .create_async()
            .await;

        let (ctx, _, navigator) = context(&server.url(), None);
        let result = ctx.login("c", "nope").await;

        refresh.assert_async().await;
        assert!(matches!(result, Err(SessionError::InvalidCredentials(_))));
        assert_eq!(navigator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logout_navigates_once() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/auth/me/")
            .with_status(200)
            .with_body(PROFILE)
            .create_async()
            .await;

        let (ctx, store, navigator) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(3_600), "r1")),
        );
        ctx.init().await;
        let mut events = ctx.subscribe();

        ctx.logout().await;
        ctx.logout().await;

        assert_eq!(ctx.status().await, AuthStatus::Anonymous);
        assert!(store.get(TokenKind::Access).await.is_none());
        assert!(!ctx.proactive_refresh_running());
        assert_eq!(navigator.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            events.recv().await,
            Ok(SessionEvent::LoggedOut(LogoutReason::UserRequested))
        ));
    }

    #[tokio::test]
    async fn rejected_session_redirects_once() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/auth/me/")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/auth/refresh/")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let (ctx, store, navigator) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(3_600), "r1")),
        );
        assert_eq!(ctx.init().await, AuthStatus::Anonymous);

        assert!(store.get(TokenKind::Access).await.is_none());
        assert_eq!(navigator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_profile_error_keeps_user() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("GET", "/auth/me/")
            .with_status(200)
            .with_body(PROFILE)
            .expect(1)
            .create_async()
            .await;

        let (ctx, _, navigator) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(3_600), "r1")),
        );
        ctx.init().await;
        ok.assert_async().await;
        ok.remove_async().await;

        server
            .mock("GET", "/auth/me/")
            .with_status(500)
            .create_async()
            .await;
        assert!(ctx.refresh().await.is_err());
        assert_eq!(ctx.current_user().await.unwrap().id, 7);
        assert_eq!(navigator.calls.load(Ordering::SeqCst), 0);
    }

    fn refresh_body(access: &str) -> String {
        json!({ "access": access }).to_string()
    }

    #[tokio::test]
    async fn proactive_check_refreshes_inside_window() {
        let mut server = Server::new_async().await;
        let fresh = token_expiring_in(3_600);
        let refresh = server
            .mock("POST", "/auth/refresh/")
            .match_body(Matcher::Json(json!({"refresh": "r1"})))
            .with_status(200)
            .with_body(refresh_body(&fresh))
            .expect(1)
            .create_async()
            .await;

        let (ctx, store, navigator) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(60), "r1")),
        );
        let mut events = ctx.subscribe();

        proactive_check(&ctx.tokens, &ctx.shared, ctx.config.proactive_window_secs).await;

        refresh.assert_async().await;
        assert_eq!(store.get(TokenKind::Access).await, Some(fresh));
        assert!(matches!(events.recv().await, Ok(SessionEvent::TokenRefreshed)));
        assert_eq!(navigator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn proactive_check_ignores_distant_expiry() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/auth/refresh/")
            .expect(0)
            .create_async()
            .await;

        let (ctx, _, _) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(3_600), "r1")),
        );
        proactive_check(&ctx.tokens, &ctx.shared, ctx.config.proactive_window_secs).await;

        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn failed_proactive_refresh_ends_session() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/auth/me/")
            .with_status(200)
            .with_body(PROFILE)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh/")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let (ctx, store, navigator) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(60), "r1")),
        );
        assert_eq!(ctx.init().await, AuthStatus::Authenticated);
        assert!(ctx.proactive_refresh_running());
        let mut events = ctx.subscribe();

        proactive_check(&ctx.tokens, &ctx.shared, ctx.config.proactive_window_secs).await;

        refresh.assert_async().await;
        assert_eq!(ctx.status().await, AuthStatus::Anonymous);
        assert!(store.get(TokenKind::Refresh).await.is_none());
        assert!(!ctx.proactive_refresh_running());
        assert_eq!(navigator.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(events.recv().await, Ok(SessionEvent::LoggedOut(_))));
    }

    #[tokio::test]
    async fn hidden_app_does_nothing() {
        let mut server = Server::new_async().await;
        let me = server.mock("GET", "/auth/me/").expect(0).create_async().await;
        let refresh = server
            .mock("POST", "/auth/refresh/")
            .expect(0)
            .create_async()
            .await;

        let (ctx, _, _) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(3_600), "r1")),
        );
        ctx.on_visibility_change(false).await;

        me.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn foreground_with_valid_token_refetches_profile() {
        let mut server = Server::new_async().await;
        let me = server
            .mock("GET", "/auth/me/")
            .with_status(200)
            .with_body(PROFILE)
            .expect(1)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh/")
            .expect(0)
            .create_async()
            .await;

        let (ctx, _, _) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(3_600), "r1")),
        );
        ctx.on_visibility_change(true).await;

        me.assert_async().await;
        refresh.assert_async().await;
        assert_eq!(ctx.current_user().await.unwrap().id, 7);
    }

    #[tokio::test]
    async fn foreground_with_stale_token_refreshes_proactively() {
        let mut server = Server::new_async().await;
        let me = server
            .mock("GET", "/auth/me/")
            .with_status(200)
            .with_body(PROFILE)
            .expect(1)
            .create_async()
            .await;
        let fresh = token_expiring_in(3_600);
        let refresh = server
            .mock("POST", "/auth/refresh/")
            .with_status(200)
            .with_body(refresh_body(&fresh))
            .expect(1)
            .create_async()
            .await;

        let (ctx, store, _) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(60), "r1")),
        );
        ctx.init().await;
        ctx.on_visibility_change(true).await;

        // One profile fetch from init, none from the foreground.
        me.assert_async().await;
        refresh.assert_async().await;
        assert_eq!(store.get(TokenKind::Access).await, Some(fresh));
        assert_eq!(ctx.status().await, AuthStatus::Authenticated);
    }

    #[tokio::test]
    async fn foreground_with_stale_token_and_no_user_waits() {
        let mut server = Server::new_async().await;
        let me = server.mock("GET", "/auth/me/").expect(0).create_async().await;
        let refresh = server
            .mock("POST", "/auth/refresh/")
            .expect(0)
            .create_async()
            .await;

        let (ctx, _, _) = context(
            &server.url(),
            Some(TokenPair::new(token_expiring_in(60), "r1")),
        );
        ctx.on_visibility_change(true).await;

        me.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn validity_uses_short_lookahead() {
        let (soon, _, _) = context(
            "http://127.0.0.1:9",
            Some(TokenPair::new(token_expiring_in(60), "r1")),
        );
        assert!(!soon.is_token_valid().await);

        let (later, _, _) = context(
            "http://127.0.0.1:9",
            Some(TokenPair::new(token_expiring_in(600), "r1")),
        );
        assert!(later.is_token_valid().await);

        let (none, _, _) = context("http://127.0.0.1:9", None);
        assert!(!none.is_token_valid().await);
    }
}
