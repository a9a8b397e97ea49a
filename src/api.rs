//! The seam between the bot and the Telegram Bot API.
//!
//! Everything the dispatch core needs from Telegram goes through the
//! [`JoinRequestApi`] trait, so the engine, executor and tests never touch
//! teloxide types directly. Remote failures are collapsed into the
//! [`ApiError`] taxonomy the executor's retry policy pattern-matches on.

use crate::registry::{PendingRegistry, PendingRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::UserId;
use thiserror::Error;

/// Classified remote failure. Each variant carries a distinct retry policy.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Telegram explicitly asked us to slow down
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Server-signaled wait before the next attempt
        retry_after: Duration,
    },
    /// Connectivity or timeout problem; worth a few retries
    #[error("network error: {0}")]
    Network(String),
    /// The bot lacks the rights to act on this chat; retrying is pointless
    #[error("missing rights: {0}")]
    Forbidden(String),
    /// The request is no longer pending (already approved/declined elsewhere)
    #[error("request already resolved: {0}")]
    AlreadyResolved(String),
    /// Anything else; logged and not retried
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Desired outcome for one join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Let the applicant in
    Approve,
    /// Turn the applicant away
    Decline,
}

impl Action {
    /// Verb for log lines and admin messages
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Decline => "decline",
        }
    }
}

/// Remote operations the dispatch core performs.
#[async_trait]
pub trait JoinRequestApi: Send + Sync {
    /// Lists up to `limit` outstanding join requests for a chat.
    async fn list_pending(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<PendingRequest>, ApiError>;

    /// Approves one join request.
    async fn approve(&self, chat_id: i64, user_id: i64) -> Result<(), ApiError>;

    /// Declines one join request.
    async fn decline(&self, chat_id: i64, user_id: i64) -> Result<(), ApiError>;
}

/// Production [`JoinRequestApi`] backed by the Telegram Bot API.
///
/// The Bot API has no endpoint for listing pending join requests, so
/// `list_pending` pages from the registry, which holds every request this
/// bot has been shown. Mutations go straight to Telegram.
pub struct TelegramGate {
    bot: Bot,
    registry: Arc<PendingRegistry>,
}

impl TelegramGate {
    /// Creates a gate over the given bot and registry
    #[must_use]
    pub fn new(bot: Bot, registry: Arc<PendingRegistry>) -> Self {
        Self { bot, registry }
    }
}

#[async_trait]
impl JoinRequestApi for TelegramGate {
    async fn list_pending(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<PendingRequest>, ApiError> {
        Ok(self.registry.page(chat_id, limit))
    }

    async fn approve(&self, chat_id: i64, user_id: i64) -> Result<(), ApiError> {
        self.bot
            .approve_chat_join_request(ChatId(chat_id), UserId(user_id.cast_unsigned()))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn decline(&self, chat_id: i64, user_id: i64) -> Result<(), ApiError> {
        self.bot
            .decline_chat_join_request(ChatId(chat_id), UserId(user_id.cast_unsigned()))
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

/// Maps a raw teloxide failure into the retryability taxonomy.
fn classify(err: teloxide::RequestError) -> ApiError {
    use teloxide::RequestError;

    match err {
        RequestError::RetryAfter(seconds) => ApiError::RateLimited {
            retry_after: seconds.duration(),
        },
        RequestError::Network(e) => ApiError::Network(e.to_string()),
        RequestError::Io(e) => ApiError::Network(e.to_string()),
        other => classify_message(&other.to_string()),
    }
}

/// Classifies a Telegram error by its message text.
///
/// The Bot API reports join-request specifics only through the description
/// string, so the interesting cases are matched on substrings.
fn classify_message(message: &str) -> ApiError {
    let lower = message.to_lowercase();

    if lower.contains("not enough rights")
        || lower.contains("chat_admin_required")
        || lower.contains("bot is not a member")
        || lower.contains("have no rights")
    {
        return ApiError::Forbidden(message.to_string());
    }

    if lower.contains("hide_requester_missing")
        || lower.contains("user_already_participant")
        || lower.contains("request to join")
    {
        return ApiError::AlreadyResolved(message.to_string());
    }

    ApiError::Unexpected(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_rights_is_forbidden() {
        let err = classify_message("Bad Request: not enough rights to invite users");
        assert!(matches!(err, ApiError::Forbidden(_)));

        let err = classify_message("CHAT_ADMIN_REQUIRED");
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[test]
    fn test_resolved_requests_are_not_retryable() {
        let err = classify_message("Bad Request: HIDE_REQUESTER_MISSING");
        assert!(matches!(err, ApiError::AlreadyResolved(_)));

        let err = classify_message("Bad Request: USER_ALREADY_PARTICIPANT");
        assert!(matches!(err, ApiError::AlreadyResolved(_)));
    }

    #[test]
    fn test_everything_else_is_unexpected() {
        let err = classify_message("Internal Server Error");
        assert!(matches!(err, ApiError::Unexpected(_)));
    }

    #[test]
    fn test_action_verbs() {
        assert_eq!(Action::Approve.verb(), "approve");
        assert_eq!(Action::Decline.verb(), "decline");
    }
}
