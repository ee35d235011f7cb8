// Re-exports so we can "use crate::config::*" easily.
pub mod config;
pub mod logging;
pub mod store;

pub use config::*;
pub use logging::*;
pub use store::*;
