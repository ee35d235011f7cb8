use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use super::store::StoreConfig;

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    pub api: ApiConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
    /// Used by the agent binary to log in when no stored session exists.
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
}

/// Load config from a YAML file, with `THESIS_`-prefixed environment
/// variables layered on top (`THESIS_API__BASE_URL=...`).
pub fn load_config(path: &str) -> ConfigV1 {
    let figment = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed("THESIS_").split("__"));
    match extract_config(figment) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    }
}

/// Extract a versioned configuration from any figment.
pub fn extract_config(figment: Figment) -> Result<ConfigV1, figment::Error> {
    match figment.extract::<Config>()? {
        Config::ConfigV1(c) => Ok(c),
    }
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() {
    let schema = schema_for!(Config);
    match serde_json::to_string_pretty(&schema) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Could not render schema: {}", e),
    }
}

/// Where the REST API lives and which paths carry the auth contract.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_me_path")]
    pub me_path: String,
    #[serde(default = "default_notifications_path")]
    pub notifications_path: String,
}

impl ApiConfig {
    /// Absolute URL for an API path. Paths are appended to `base_url`, so a
    /// base of `https://host/api` keeps its `/api` prefix.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// True when `path` is the login or refresh endpoint.
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        same_path(path, &self.login_path) || same_path(path, &self.refresh_path)
    }
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_matches('/') == b.trim_matches('/')
}

/// Timing knobs of the token lifecycle and the session's background check.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct SessionConfig {
    /// `ensure_valid` refreshes when the access token expires within this window.
    #[serde(default = "default_refresh_lookahead")]
    pub refresh_lookahead_secs: i64,
    /// `is_token_valid` reports false inside this window.
    #[serde(default = "default_validity_lookahead")]
    pub validity_lookahead_secs: i64,
    /// The periodic check refreshes proactively inside this window.
    #[serde(default = "default_proactive_window")]
    pub proactive_window_secs: i64,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_lookahead_secs: default_refresh_lookahead(),
            validity_lookahead_secs: default_validity_lookahead(),
            proactive_window_secs: default_proactive_window(),
            check_interval_secs: default_check_interval(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct NotificationsConfig {
    /// Streaming endpoint, e.g. `wss://host/ws/notifications/`.
    pub ws_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_limit")]
    pub poll_limit: u32,
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

#[derive(Deserialize, Serialize, Clone, JsonSchema)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_timeout_in_ms() -> u64 {
    10_000
}
fn default_login_path() -> String {
    "/auth/login/".to_string()
}
fn default_refresh_path() -> String {
    "/auth/refresh/".to_string()
}
fn default_me_path() -> String {
    "/auth/me/".to_string()
}
fn default_notifications_path() -> String {
    "/notifications/".to_string()
}
fn default_refresh_lookahead() -> i64 {
    300
}
fn default_validity_lookahead() -> i64 {
    120
}
fn default_proactive_window() -> i64 {
    180
}
fn default_check_interval() -> u64 {
    60
}
fn default_poll_interval() -> u64 {
    30
}
fn default_poll_limit() -> u32 {
    50
}
fn default_reconnect_interval() -> u64 {
    3_000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
