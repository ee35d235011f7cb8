use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::models::{Notification, NotificationId};

/// What a notification view renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    /// Newest first.
    pub items: Vec<Notification>,
    pub unread_count: u32,
    /// Last load/poll/mark failure. Kept until the next success.
    pub last_error: Option<String>,
}

/// The client-side notification list, shared by the poller and the
/// realtime channel. All updates are synchronous so that an optimistic
/// change is visible before the request confirming it is even sent.
#[derive(Debug, Default)]
pub struct NotificationFeed {
    state: Mutex<FeedState>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> FeedState {
        self.lock().clone()
    }

    pub fn unread_count(&self) -> u32 {
        self.lock().unread_count
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Replace the whole list, e.g. after a full load.
    pub fn replace(&self, items: Vec<Notification>, unread_count: u32) {
        let mut state = self.lock();
        state.items = dedup(items);
        state.unread_count = unread_count;
        state.last_error = None;
    }

    /// Add the notifications whose ids are not known yet and return how many
    /// of them were unread. Ids already present are skipped, so merging the
    /// same batch twice changes nothing.
    pub fn merge_new(&self, incoming: Vec<Notification>) -> u32 {
        let mut state = self.lock();
        let mut known: HashSet<NotificationId> = state.items.iter().map(|n| n.id).collect();

        let mut fresh = Vec::new();
        for notification in incoming {
            if known.insert(notification.id) {
                fresh.push(notification);
            }
        }
        let new_unread = fresh.iter().filter(|n| !n.is_read).count() as u32;

        fresh.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        fresh.append(&mut state.items);
        state.items = fresh;
        state.unread_count = state.unread_count.saturating_add(new_unread);
        new_unread
    }

    /// Add a single notification at the top. Returns false if its id is
    /// already known.
    pub fn push(&self, notification: Notification) -> bool {
        let mut state = self.lock();
        if state.items.iter().any(|n| n.id == notification.id) {
            return false;
        }
        if !notification.is_read {
            state.unread_count = state.unread_count.saturating_add(1);
        }
        state.items.insert(0, notification);
        true
    }

    /// The server pushed an authoritative unread count.
    pub fn set_unread_count(&self, unread_count: u32) {
        self.lock().unread_count = unread_count;
    }

    /// Flip one notification to read. Returns false if it is unknown or was
    /// already read.
    pub fn mark_read(&self, id: NotificationId) -> bool {
        let mut state = self.lock();
        let flipped = match state.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.is_read => {
                n.is_read = true;
                true
            }
            _ => false,
        };
        if flipped {
            state.unread_count = state.unread_count.saturating_sub(1);
        }
        flipped
    }

    /// Flip everything to read; returns how many changed.
    pub fn mark_all_read(&self) -> u32 {
        let mut state = self.lock();
        let mut flipped = 0;
        for n in state.items.iter_mut().filter(|n| !n.is_read) {
            n.is_read = true;
            flipped += 1;
        }
        state.unread_count = 0;
        flipped
    }

    pub fn remove(&self, id: NotificationId) -> Option<Notification> {
        let mut state = self.lock();
        let index = state.items.iter().position(|n| n.id == id)?;
        let removed = state.items.remove(index);
        if !removed.is_read {
            state.unread_count = state.unread_count.saturating_sub(1);
        }
        Some(removed)
    }

    pub fn record_error(&self, error: impl ToString) {
        self.lock().last_error = Some(error.to_string());
    }

    pub fn clear_error(&self) {
        self.lock().last_error = None;
    }

    /// Forget everything; used when the session ends.
    pub fn reset(&self) {
        *self.lock() = FeedState::default();
    }
}

fn dedup(items: Vec<Notification>) -> Vec<Notification> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|n| seen.insert(n.id)).collect()
}
