//! Retrying executor for single approve/decline mutations.
//!
//! All remote faults are absorbed here: callers get a three-way outcome they
//! can aggregate without per-item error handling, and every failure reason
//! is logged exactly once.

use crate::api::{Action, ApiError, JoinRequestApi};
use crate::config::{
    NETWORK_MAX_ATTEMPTS, NETWORK_RETRY_DELAY_MS, RATE_LIMIT_MARGIN_MS, RATE_LIMIT_MAX_ATTEMPTS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Final outcome of one executed mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The remote mutation went through
    Done,
    /// The mutation failed and is not worth retrying (or retries exhausted)
    Failed,
    /// The bot lacks rights on the chat; the caller may abort its whole run
    Forbidden,
}

impl ExecOutcome {
    /// Whether the mutation succeeded
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Wraps a [`JoinRequestApi`] with classification-driven retry.
pub struct Executor {
    api: Arc<dyn JoinRequestApi>,
}

impl Executor {
    /// Creates an executor over the given API
    #[must_use]
    pub fn new(api: Arc<dyn JoinRequestApi>) -> Self {
        Self { api }
    }

    /// Performs one approve/decline with bounded retries.
    ///
    /// Retry policy by fault class:
    /// - rate limited: sleep the signaled duration plus a safety margin,
    ///   up to [`RATE_LIMIT_MAX_ATTEMPTS`] attempts
    /// - network/timeout: sleep a fixed short delay, up to
    ///   [`NETWORK_MAX_ATTEMPTS`] attempts
    /// - missing rights: fail immediately as [`ExecOutcome::Forbidden`]
    /// - already resolved or unexpected: fail immediately
    ///
    /// Never panics and never propagates an error past this boundary.
    pub async fn execute(&self, action: Action, chat_id: i64, user_id: i64) -> ExecOutcome {
        let mut attempt = 1usize;

        loop {
            let result = match action {
                Action::Approve => self.api.approve(chat_id, user_id).await,
                Action::Decline => self.api.decline(chat_id, user_id).await,
            };

            let err = match result {
                Ok(()) => return ExecOutcome::Done,
                Err(e) => e,
            };

            match err {
                ApiError::RateLimited { retry_after } => {
                    if attempt >= RATE_LIMIT_MAX_ATTEMPTS {
                        error!(
                            "{} for user {} in chat {}: still rate limited after {} attempts",
                            action.verb(),
                            user_id,
                            chat_id,
                            attempt
                        );
                        return ExecOutcome::Failed;
                    }
                    let wait = retry_after + Duration::from_millis(RATE_LIMIT_MARGIN_MS);
                    warn!(
                        "{} for user {} in chat {}: rate limited, waiting {:?} (attempt {})",
                        action.verb(),
                        user_id,
                        chat_id,
                        wait,
                        attempt
                    );
                    tokio::time::sleep(wait).await;
                }
                ApiError::Network(reason) => {
                    if attempt >= NETWORK_MAX_ATTEMPTS {
                        error!(
                            "{} for user {} in chat {}: network failure after {} attempts: {}",
                            action.verb(),
                            user_id,
                            chat_id,
                            attempt,
                            reason
                        );
                        return ExecOutcome::Failed;
                    }
                    warn!(
                        "{} for user {} in chat {}: network failure, retrying: {}",
                        action.verb(),
                        user_id,
                        chat_id,
                        reason
                    );
                    tokio::time::sleep(Duration::from_millis(NETWORK_RETRY_DELAY_MS)).await;
                }
                ApiError::Forbidden(reason) => {
                    error!(
                        "{} for user {} in chat {}: missing rights, not retrying: {}",
                        action.verb(),
                        user_id,
                        chat_id,
                        reason
                    );
                    return ExecOutcome::Forbidden;
                }
                ApiError::AlreadyResolved(reason) => {
                    warn!(
                        "{} for user {} in chat {}: already resolved: {}",
                        action.verb(),
                        user_id,
                        chat_id,
                        reason
                    );
                    return ExecOutcome::Failed;
                }
                ApiError::Unexpected(reason) => {
                    error!(
                        "{} for user {} in chat {}: unexpected failure, not retrying: {}",
                        action.verb(),
                        user_id,
                        chat_id,
                        reason
                    );
                    return ExecOutcome::Failed;
                }
            }

            attempt += 1;
        }
    }
}
