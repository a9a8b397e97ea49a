//! Inline-button callbacks.
//!
//! Two families of callback data:
//! - `sel:<chat_id>` — chat selection from `/select`
//! - `ok:<chat_id>:<user_id>` / `no:<chat_id>:<user_id>` — single-item
//!   approve/decline from a join-request notification
//!
//! Single-item actions are idempotent under double-taps: the registry entry
//! is taken atomically before anything touches the network, so the second
//! tap finds nothing and reports "already handled" without a remote call.

use crate::api::Action;
use crate::bot::send::edit_message_safe;
use crate::bot::sessions::Sessions;
use crate::config::Settings;
use crate::executor::{ExecOutcome, Executor};
use crate::limit::RateLimiter;
use crate::registry::{PendingRegistry, PendingRequest};
use crate::utils::{mention_html, render_template};
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{info, warn};

/// Parsed callback payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPayload {
    /// Admin picked a chat to work on
    Select {
        /// Chosen chat
        chat_id: i64,
    },
    /// Admin pressed approve/decline on one notification
    Act {
        /// Desired action
        action: Action,
        /// Chat the button claims the request belongs to
        chat_id: i64,
        /// Applicant
        user_id: i64,
    },
}

/// Parses callback data; `None` for unknown or malformed payloads.
#[must_use]
pub fn parse_payload(data: &str) -> Option<CallbackPayload> {
    let mut parts = data.split(':');
    let tag = parts.next()?;
    match tag {
        "sel" => {
            let chat_id = parts.next()?.parse().ok()?;
            parts.next().is_none().then_some(CallbackPayload::Select { chat_id })
        }
        "ok" | "no" => {
            let chat_id = parts.next()?.parse().ok()?;
            let user_id = parts.next()?.parse().ok()?;
            let action = if tag == "ok" {
                Action::Approve
            } else {
                Action::Decline
            };
            parts.next().is_none().then_some(CallbackPayload::Act {
                action,
                chat_id,
                user_id,
            })
        }
        _ => None,
    }
}

/// Shared state the callback endpoint needs
pub struct CallbackContext {
    /// Pending-request registry
    pub registry: Arc<PendingRegistry>,
    /// Retrying executor
    pub executor: Arc<Executor>,
    /// Global rate limiter, shared with bulk runs
    pub limiter: Arc<RateLimiter>,
    /// Per-admin selections
    pub sessions: Arc<Sessions>,
    /// Settings (welcome template)
    pub settings: Arc<Settings>,
}

/// Handles one callback query from an admin.
///
/// # Errors
///
/// Returns an error if Telegram API calls fail.
pub async fn handle_callback(bot: Bot, q: CallbackQuery, ctx: Arc<CallbackContext>) -> Result<()> {
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let Some(payload) = parse_payload(data) else {
        warn!("ignoring malformed callback data: {data}");
        return Ok(());
    };

    let _ = bot.answer_callback_query(q.id.clone()).await;

    let admin_id = q.from.id.0.cast_signed();
    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let origin = message.chat().id;
    let msg_id = message.id();

    match payload {
        CallbackPayload::Select { chat_id } => {
            ctx.sessions.select(admin_id, chat_id);
            edit_message_safe(
                &bot,
                origin,
                msg_id,
                &format!("✅ Selected chat <code>{chat_id}</code>."),
            )
            .await;
        }
        CallbackPayload::Act {
            action,
            chat_id,
            user_id,
        } => {
            let verdict = act_on_request(&bot, &ctx, action, chat_id, user_id).await;
            edit_message_safe(&bot, origin, msg_id, &verdict).await;
        }
    }

    Ok(())
}

/// What happened to one single-item action
#[derive(Debug)]
enum SingleOutcome {
    /// Nothing stored for this applicant anymore
    AlreadyHandled,
    /// The button names a different chat than the stored entry
    ChatMismatch,
    /// The remote mutation went through
    Done(PendingRequest),
    /// The bot lacks rights on the chat
    Forbidden(PendingRequest),
    /// Retries exhausted or a non-retryable failure
    Failed(PendingRequest),
}

/// Takes one entry and runs the mutation through the shared rate window.
async fn execute_single(
    ctx: &CallbackContext,
    action: Action,
    chat_id: i64,
    user_id: i64,
) -> SingleOutcome {
    // Atomic take: competing taps and bulk runs see the entry at most once.
    let Some(request) = ctx.registry.take(user_id) else {
        return SingleOutcome::AlreadyHandled;
    };

    if request.chat_id != chat_id {
        // Stale or forged button: put nothing back, execute nothing.
        warn!(
            "callback chat mismatch for user {user_id}: button says {chat_id}, registry has {}",
            request.chat_id
        );
        return SingleOutcome::ChatMismatch;
    }

    // Button presses count against the same ceiling as bulk workers.
    ctx.limiter.admit().await;
    match ctx.executor.execute(action, chat_id, user_id).await {
        ExecOutcome::Done => SingleOutcome::Done(request),
        ExecOutcome::Forbidden => SingleOutcome::Forbidden(request),
        ExecOutcome::Failed => SingleOutcome::Failed(request),
    }
}

/// Executes one single-item action and returns the admin-facing verdict.
async fn act_on_request(
    bot: &Bot,
    ctx: &CallbackContext,
    action: Action,
    chat_id: i64,
    user_id: i64,
) -> String {
    match execute_single(ctx, action, chat_id, user_id).await {
        SingleOutcome::AlreadyHandled => {
            format!("ℹ️ Request <code>{user_id}</code> was already handled.")
        }
        SingleOutcome::ChatMismatch => {
            "⚠️ This button refers to a different chat than the stored request. Nothing was done."
                .to_string()
        }
        SingleOutcome::Done(request) => {
            let label = html_escape::encode_text(&request.label()).to_string();
            info!("{} {} in chat {} via button", action.verb(), user_id, chat_id);
            if action == Action::Approve {
                send_welcome(bot, ctx, &request.full_name, user_id, chat_id).await;
                format!("✅ Approved {label}.")
            } else {
                format!("🚫 Declined {label}.")
            }
        }
        SingleOutcome::Forbidden(request) => {
            let label = html_escape::encode_text(&request.label()).to_string();
            format!(
                "⛔ Can't {} {label}: the bot lacks admin rights in this chat.",
                action.verb()
            )
        }
        SingleOutcome::Failed(request) => {
            let label = html_escape::encode_text(&request.label()).to_string();
            format!("⚠️ Failed to {} {label}, see logs.", action.verb())
        }
    }
}

/// Posts the configured welcome message to the group, if any.
async fn send_welcome(bot: &Bot, ctx: &CallbackContext, name: &str, user_id: i64, chat_id: i64) {
    let Some(template) = ctx.settings.welcome_template.as_deref() else {
        return;
    };
    let text = render_template(template, &mention_html(user_id, name));
    if let Err(e) = bot
        .send_message(ChatId(chat_id), text)
        .parse_mode(ParseMode::Html)
        .await
    {
        warn!("failed to send welcome message to chat {chat_id}: {e}");
    }
}
