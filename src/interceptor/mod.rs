//! The HTTP client chain every authenticated call goes through.

pub mod client;
pub mod retry;

pub use client::{build_http_client, ApiClient, ApiRequest, AuthFailureHandler};
pub use retry::{decide, RetryDecision};
