use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::token::TokenPair;

/// The profile returned by `GET /auth/me/`.
///
/// Only the fields the session layer looks at are modelled; everything else
/// the platform sends (department, supervisor, group ids, ...) is kept in
/// `attributes` so that views can still read it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub attributes: HashMap<String, Value>,
}

impl User {
    /// Best human-readable identifier for logs.
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| format!("user-{}", self.id))
    }
}

/// Credentials posted to the login endpoint.
#[derive(Serialize, Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Successful login body.
#[derive(Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    #[serde(default)]
    pub user: Option<User>,
}

impl LoginResponse {
    pub fn tokens(&self) -> TokenPair {
        TokenPair::new(self.access.clone(), self.refresh.clone())
    }
}

/// Body of a `403` from the login endpoint for accounts that still need
/// e-mail verification.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct LoginRejection {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub resend_verification: bool,
}
