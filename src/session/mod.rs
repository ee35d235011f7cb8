//! Authentication state as the rest of the application sees it.

pub mod context;
pub mod events;
pub mod shared;

pub use context::SessionContext;
pub use events::{LogNavigator, LogoutReason, Navigator, SessionEvent};
pub use shared::{AuthStatus, Session, SessionShared};
