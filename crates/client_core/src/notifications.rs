use std::collections::{BTreeMap, HashSet, VecDeque};

use shared::{domain::UnitKey, protocol::CommentPayload};

pub const DEFAULT_SUMMARY_CAP: usize = 50;

/// Identifies a line-comment thread. A thread is open or absent, never
/// duplicated for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub unit: UnitKey,
    pub line_number: u32,
}

impl ThreadKey {
    pub fn new(unit: UnitKey, line_number: u32) -> Self {
        Self { unit, line_number }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEntry {
    pub unit: UnitKey,
    pub comment: CommentPayload,
}

/// Unread badge counter plus a capped, most-recent-first list of
/// notification summaries for a dropdown view. The counter is always
/// the server-reported value; it is never incremented locally.
#[derive(Debug)]
pub struct NotificationStore {
    unread: u64,
    summaries: VecDeque<NotificationEntry>,
    cap: usize,
    comments: BTreeMap<UnitKey, Vec<CommentPayload>>,
    open_threads: HashSet<ThreadKey>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::with_cap(DEFAULT_SUMMARY_CAP)
    }
}

impl NotificationStore {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            unread: 0,
            summaries: VecDeque::new(),
            cap,
            comments: BTreeMap::new(),
            open_threads: HashSet::new(),
        }
    }

    /// Replaces the unread counter with the server's value.
    pub fn set_unread(&mut self, count: u64) {
        self.unread = count;
    }

    pub fn unread(&self) -> u64 {
        self.unread
    }

    /// Appends a comment once per identity (created_at, author, text).
    /// Returns false for a duplicate, which happens when the same event
    /// arrives via both transports during a handover window.
    pub fn append(&mut self, unit: UnitKey, comment: CommentPayload) -> bool {
        let history = self.comments.entry(unit).or_default();
        if history.iter().any(|c| c.identity() == comment.identity()) {
            return false;
        }
        history.push(comment.clone());

        self.summaries.push_front(NotificationEntry { unit, comment });
        self.summaries.truncate(self.cap);
        true
    }

    /// Most-recent-first summaries for the dropdown.
    pub fn recent(&self) -> Vec<NotificationEntry> {
        self.summaries.iter().cloned().collect()
    }

    /// Full comment history for one line of one unit, oldest first.
    pub fn thread_history(&self, key: ThreadKey) -> Vec<CommentPayload> {
        self.comments
            .get(&key.unit)
            .map(|history| {
                history
                    .iter()
                    .filter(|c| c.line_number == Some(key.line_number))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Marks a thread open. Returns false if it was already open.
    pub fn open_thread(&mut self, key: ThreadKey) -> bool {
        self.open_threads.insert(key)
    }

    /// Returns false if the thread was not open.
    pub fn close_thread(&mut self, key: ThreadKey) -> bool {
        self.open_threads.remove(&key)
    }

    pub fn is_thread_open(&self, key: ThreadKey) -> bool {
        self.open_threads.contains(&key)
    }
}

/// Badge text for the unread counter: hidden at zero, clamped at 99+.
pub fn badge_label(count: u64) -> Option<String> {
    match count {
        0 => None,
        1..=99 => Some(count.to_string()),
        _ => Some("99+".into()),
    }
}

#[cfg(test)]
#[path = "tests/notifications_tests.rs"]
mod tests;
