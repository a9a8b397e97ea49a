//! Per-admin chat selection.
//!
//! `/approve` and `/decline` without an explicit chat argument act on the
//! chat the admin last picked via `/select`.

use std::collections::HashMap;
use std::sync::Mutex;

/// Maps admin user IDs to their currently selected chat
#[derive(Default)]
pub struct Sessions {
    selected: Mutex<HashMap<i64, i64>>,
}

impl Sessions {
    /// Creates an empty session store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers `chat_id` as the admin's working chat
    pub fn select(&self, admin_id: i64, chat_id: i64) {
        self.lock().insert(admin_id, chat_id);
    }

    /// Returns the admin's selected chat, if any
    #[must_use]
    pub fn selected(&self, admin_id: i64) -> Option<i64> {
        self.lock().get(&admin_id).copied()
    }

    /// Clears the admin's selection; returns whether one existed
    pub fn clear(&self, admin_id: i64) -> bool {
        self.lock().remove(&admin_id).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, i64>> {
        self.selected
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
