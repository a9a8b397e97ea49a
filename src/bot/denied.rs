//! Flood protection for unauthorized command attempts.
//!
//! Non-admins poking at privileged commands get one denial message per
//! cooldown window instead of one per attempt, which keeps the bot from
//! spamming itself into Telegram rate limits.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Tracks which users recently received a denial message.
///
/// The cooldown gates when the next message may go out; the cache TTL only
/// bounds how long an idle entry is remembered.
pub struct DeniedCache {
    cache: Cache<i64, Instant>,
    cooldown: Duration,
    silenced: AtomicU64,
}

impl DeniedCache {
    /// Creates a cache with the given cooldown, entry TTL and capacity
    #[must_use]
    pub fn new(cooldown_secs: u64, ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            cache,
            cooldown: Duration::from_secs(cooldown_secs),
            silenced: AtomicU64::new(0),
        }
    }

    /// Whether a denial message should be sent to this user now.
    ///
    /// Silenced attempts are counted; only every 100th is logged.
    pub async fn should_send(&self, user_id: i64) -> bool {
        match self.cache.get(&user_id).await {
            None => true,
            Some(sent_at) if sent_at.elapsed() >= self.cooldown => true,
            Some(_) => {
                let count = self.silenced.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 100 == 0 {
                    debug!("silenced {count} unauthorized attempts (recent: user {user_id})");
                }
                false
            }
        }
    }

    /// Records that a denial message was delivered, starting the cooldown
    pub async fn mark_sent(&self, user_id: i64) {
        self.cache.insert(user_id, Instant::now()).await;
    }

    /// Total silenced attempts so far
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced.load(Ordering::Relaxed)
    }

    /// Configured cooldown between messages to the same user
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
