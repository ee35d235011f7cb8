use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type NotificationId = i64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
    /// Also what unknown kinds decode to.
    #[default]
    #[serde(other)]
    Info,
}

/// A notification as delivered by the server. The client only ever changes
/// `is_read`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    #[serde(default, alias = "message")]
    pub body: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub link: Option<String>,
}

/// `GET /notifications/mine/` answers either with a bare list or with a
/// paginated envelope.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum NotificationPage {
    List(Vec<Notification>),
    Paged { results: Vec<Notification> },
}

impl NotificationPage {
    pub fn into_items(self) -> Vec<Notification> {
        match self {
            NotificationPage::List(items) => items,
            NotificationPage::Paged { results } => results,
        }
    }
}
