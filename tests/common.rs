#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use figment::{
    providers::{Format, Yaml},
    Figment,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use thesis_session::auth::now_secs;
use thesis_session::config::{extract_config, ConfigV1};
use thesis_session::session::Navigator;
use thesis_session::state::AppState;
use thesis_session::store::TokenStore;

/// Counts redirects to the login page.
#[derive(Default)]
pub struct RecordingNavigator {
    calls: AtomicUsize,
}

impl RecordingNavigator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Navigator for RecordingNavigator {
    fn navigate_to_login(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_config(api_url: &str, ws_url: &str, store_yaml: &str) -> ConfigV1 {
    let raw = format!(
        r#"
version: "1.0.0"
api:
  base_url: "{api_url}"
  timeout_in_ms: 3000
{store_yaml}
session:
  check_interval_secs: 3600
notifications:
  ws_url: "{ws_url}"
  poll_interval_secs: 3600
  poll_limit: 10
  reconnect_interval_ms: 20
  max_reconnect_attempts: 2
logging:
  level: "debug"
  format: "json"
"#
    );
    extract_config(Figment::new().merge(Yaml::string(&raw))).expect("test config should parse")
}

pub const MEMORY_STORE: &str = "store:\n  type: memory";

pub fn file_store(path: &str) -> String {
    format!("store:\n  type: file\n  path: \"{}\"", path)
}

pub fn build_state(
    config: ConfigV1,
    store: Arc<dyn TokenStore>,
) -> (AppState, Arc<RecordingNavigator>) {
    let navigator = Arc::new(RecordingNavigator::default());
    let state = AppState::build(Arc::new(config), store, navigator.clone())
        .expect("state should build");
    (state, navigator)
}

pub fn token_expiring_in(secs: i64) -> String {
    encode(
        &Header::default(),
        &json!({ "exp": now_secs() + secs, "user_id": 42 }),
        &EncodingKey::from_secret(b"not-the-server-secret"),
    )
    .expect("token should encode")
}

pub fn notification(id: i64, is_read: bool) -> serde_json::Value {
    json!({
        "id": id,
        "title": format!("Notification {}", id),
        "message": "Something happened in your thesis group",
        "type": "info",
        "is_read": is_read,
        "created_at": format!("2024-06-01T12:00:{:02}Z", id),
    })
}

pub const PROFILE: &str = r#"{
    "id": 42,
    "username": "mkowalska",
    "email": "m.kowalska@uni.example.edu",
    "first_name": "Maria",
    "last_name": "Kowalska",
    "role": "student",
    "group_id": 3
}"#;
