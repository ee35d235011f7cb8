pub mod notification;
pub mod token;
pub mod user;

pub use notification::{Notification, NotificationId, NotificationKind, NotificationPage};
pub use token::{TokenKind, TokenPair};
pub use user::{LoginRejection, LoginRequest, LoginResponse, User};
