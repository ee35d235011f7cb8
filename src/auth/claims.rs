use std::collections::HashSet;

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::SessionError;

/// The part of the access token the client cares about.
#[derive(Debug, Deserialize, Clone)]
pub struct AccessClaims {
    pub exp: i64,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
}

/// Reads the claims segment of an access token without checking the
/// signature. The client cannot verify it and only needs `exp`; the server
/// remains the authority on whether the token is accepted.
pub fn decode_claims(token: &str) -> Result<AccessClaims, SessionError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::from(["exp".to_string()]);

    decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| SessionError::MalformedToken(e.to_string()))
}
