use http::StatusCode;

use crate::config::ApiConfig;

/// What the client does with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 2xx; hand the response to the caller.
    Deliver,
    /// Non-401 error; surface it unchanged.
    PassThrough,
    /// 401 from the login or refresh endpoint; surface it without recovery.
    Surface,
    /// First 401; refresh the access token and send the request once more.
    RefreshAndRetry,
    /// 401 on the retried request; give up on the session.
    ForceLogin,
}

/// Decide how to proceed after `status` came back for a request to `path`
/// that has already been retried `prior_attempts` times.
pub fn decide(api: &ApiConfig, path: &str, status: StatusCode, prior_attempts: u32) -> RetryDecision {
    if status.is_success() {
        return RetryDecision::Deliver;
    }
    if status != StatusCode::UNAUTHORIZED {
        return RetryDecision::PassThrough;
    }
    if api.is_auth_endpoint(path) {
        return RetryDecision::Surface;
    }
    if prior_attempts >= 1 {
        RetryDecision::ForceLogin
    } else {
        RetryDecision::RefreshAndRetry
    }
}
