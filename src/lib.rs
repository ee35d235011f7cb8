//! Library exports for thesis-session, shared between the agent binary and
//! tests.

pub mod auth;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod models;
pub mod notifications;
pub mod session;
pub mod startup;
pub mod state;
pub mod store;
pub mod utils;
