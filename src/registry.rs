//! In-memory bookkeeping of pending join requests.
//!
//! The registry is the bot's live view of who is waiting at the door. It is
//! populated by incoming `chat_join_request` updates and drained the instant
//! an entry is handed to the executor, so a single-item button press and a
//! concurrent bulk run can never both act on the same applicant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Snapshot of one pending join request, captured at arrival time.
///
/// The profile fields are never re-fetched; they exist so admin-facing
/// messages can name the applicant without extra API calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingRequest {
    /// Applicant's Telegram user ID (registry key)
    pub user_id: i64,
    /// Chat the applicant wants to join
    pub chat_id: i64,
    /// Chat title at request time
    pub chat_title: String,
    /// Applicant's display name at request time
    pub full_name: String,
    /// Applicant's @username, if set
    pub username: Option<String>,
}

impl PendingRequest {
    /// Human-readable label: "Full Name (@username)" or "Full Name"
    #[must_use]
    pub fn label(&self) -> String {
        match &self.username {
            Some(u) => format!("{} (@{u})", self.full_name),
            None => self.full_name.clone(),
        }
    }
}

/// Process-wide registry of pending join requests, keyed by applicant ID.
///
/// Every operation is a single non-suspending critical section, so atomicity
/// holds across the await points of the tasks sharing it.
#[derive(Default)]
pub struct PendingRegistry {
    entries: Mutex<BTreeMap<i64, PendingRequest>>,
}

impl PendingRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pending request, replacing any previous snapshot for the
    /// same applicant (a user can only have one outstanding request per bot).
    pub fn record(&self, request: PendingRequest) {
        let mut entries = lock(&self.entries);
        entries.insert(request.user_id, request);
    }

    /// Atomically removes and returns the entry for `user_id`.
    ///
    /// Exactly one of any number of competing callers gets the entry; the
    /// rest see `None`, which means "already processed or never existed" and
    /// must be treated as a benign no-op.
    #[must_use]
    pub fn take(&self, user_id: i64) -> Option<PendingRequest> {
        lock(&self.entries).remove(&user_id)
    }

    /// Best-effort removal, used by bulk runs to keep the registry
    /// convergent with successfully resolved requests.
    pub fn remove(&self, user_id: i64) {
        lock(&self.entries).remove(&user_id);
    }

    /// Returns up to `limit` entries for one chat, in applicant-ID order.
    #[must_use]
    pub fn page(&self, chat_id: i64, limit: usize) -> Vec<PendingRequest> {
        lock(&self.entries)
            .values()
            .filter(|r| r.chat_id == chat_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns all entries ordered by (chat, applicant).
    #[must_use]
    pub fn snapshot(&self) -> Vec<PendingRequest> {
        let mut all: Vec<PendingRequest> = lock(&self.entries).values().cloned().collect();
        all.sort_by_key(|r| (r.chat_id, r.user_id));
        all
    }

    /// Pending count and last-seen title per chat, ordered by chat ID.
    #[must_use]
    pub fn counts_by_chat(&self) -> BTreeMap<i64, (String, usize)> {
        let mut counts: BTreeMap<i64, (String, usize)> = BTreeMap::new();
        for request in lock(&self.entries).values() {
            let entry = counts
                .entry(request.chat_id)
                .or_insert_with(|| (request.chat_title.clone(), 0));
            entry.0 = request.chat_title.clone();
            entry.1 += 1;
        }
        counts
    }

    /// Total number of pending entries
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

/// Locks a mutex, recovering the inner data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request(user_id: i64, chat_id: i64) -> PendingRequest {
        PendingRequest {
            user_id,
            chat_id,
            chat_title: format!("Chat {chat_id}"),
            full_name: format!("User {user_id}"),
            username: None,
        }
    }

    #[test]
    fn test_take_is_single_winner() {
        let registry = PendingRegistry::new();
        registry.record(request(1, 100));

        assert!(registry.take(1).is_some());
        assert!(registry.take(1).is_none());
    }

    #[test]
    fn test_take_unknown_is_none() {
        let registry = PendingRegistry::new();
        assert!(registry.take(42).is_none());
    }

    #[test]
    fn test_record_replaces_previous_snapshot() {
        let registry = PendingRegistry::new();
        registry.record(request(1, 100));
        registry.record(request(1, 200));

        let taken = registry.take(1).expect("entry present");
        assert_eq!(taken.chat_id, 200);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_page_filters_by_chat_and_limit() {
        let registry = PendingRegistry::new();
        for user_id in 1..=5 {
            registry.record(request(user_id, 100));
        }
        registry.record(request(6, 200));

        let page = registry.page(100, 3);
        assert_eq!(page.len(), 3);
        assert!(page.iter().all(|r| r.chat_id == 100));

        assert_eq!(registry.page(200, 10).len(), 1);
        assert!(registry.page(300, 10).is_empty());
    }

    #[test]
    fn test_snapshot_ordered_by_chat_then_user() {
        let registry = PendingRegistry::new();
        registry.record(request(9, 200));
        registry.record(request(2, 100));
        registry.record(request(7, 100));

        let keys: Vec<(i64, i64)> = registry
            .snapshot()
            .iter()
            .map(|r| (r.chat_id, r.user_id))
            .collect();
        assert_eq!(keys, vec![(100, 2), (100, 7), (200, 9)]);
    }

    #[test]
    fn test_counts_by_chat() {
        let registry = PendingRegistry::new();
        registry.record(request(1, 100));
        registry.record(request(2, 100));
        registry.record(request(3, 200));

        let counts = registry.counts_by_chat();
        assert_eq!(counts.get(&100).map(|(_, n)| *n), Some(2));
        assert_eq!(counts.get(&200).map(|(_, n)| *n), Some(1));
    }

    #[test]
    fn test_concurrent_take_has_exactly_one_winner() {
        let registry = Arc::new(PendingRegistry::new());
        registry.record(request(1, 100));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                usize::from(registry.take(1).is_some())
            }));
        }

        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .sum();
        assert_eq!(winners, 1);
    }
}
