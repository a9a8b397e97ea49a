//! Command handlers for the admin surface.

use crate::api::Action;
use crate::bot::send::{edit_message_safe, send_html_resilient};
use crate::bot::sessions::Sessions;
use crate::dispatch::{BulkDispatcher, BulkProgress, BulkReport};
use crate::registry::PendingRegistry;
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use teloxide::utils::command::BotCommands;
use tokio::sync::mpsc;
use tracing::info;

/// Supported commands
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Greeting and usage hint
    #[command(description = "Start the bot.")]
    Start,
    /// Show the caller's Telegram ID
    #[command(description = "Show your user ID.")]
    Id,
    /// Pending counts per chat
    #[command(description = "List pending join requests.")]
    Requests,
    /// Pick a chat to work on
    #[command(description = "Select a chat.")]
    Select,
    /// Bulk approve: `/approve [cap] [chat_id]`
    #[command(description = "Approve pending requests: /approve [cap] [chat_id]")]
    Approve(String),
    /// Bulk decline: `/decline [cap] [chat_id]`
    #[command(description = "Decline pending requests: /decline [cap] [chat_id]")]
    Decline(String),
    /// Clear the chat selection
    #[command(description = "Cancel the current selection.")]
    Cancel,
}

impl Command {
    /// Whether the command requires the caller to be an admin
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        !matches!(self, Self::Start | Self::Id)
    }
}

/// Parsed `/approve` / `/decline` arguments: optional success cap and
/// optional explicit chat ID.
///
/// Chat IDs are the tokens starting with `-` (Telegram group IDs are
/// negative); a bare positive number is the cap.
///
/// # Errors
///
/// Returns usage guidance for malformed input; nothing is mutated.
pub fn parse_bulk_args(args: &str) -> Result<(Option<u64>, Option<i64>), String> {
    const USAGE: &str = "Usage: /approve [cap] [chat_id] — e.g. /approve 50 or /approve 50 -100123";

    let mut cap = None;
    let mut chat_id = None;

    for token in args.split_whitespace() {
        if token.starts_with('-') {
            if chat_id.is_some() {
                return Err(USAGE.to_string());
            }
            chat_id = Some(token.parse::<i64>().map_err(|_| USAGE.to_string())?);
        } else {
            if cap.is_some() {
                return Err(USAGE.to_string());
            }
            let parsed = token.parse::<u64>().map_err(|_| USAGE.to_string())?;
            if parsed == 0 {
                return Err(USAGE.to_string());
            }
            cap = Some(parsed);
        }
    }

    Ok((cap, chat_id))
}

/// `/start`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(
        msg.chat.id,
        "Hi! I watch join requests for your groups.\n\
         /requests shows what's pending, /select picks a chat, \
         /approve and /decline handle them in bulk.",
    )
    .await?;
    Ok(())
}

/// `/id`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn my_id(bot: Bot, msg: Message) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let handle = user
        .username
        .as_deref()
        .map_or_else(String::new, |u| format!("\n@{u}"));
    bot.send_message(
        msg.chat.id,
        format!(
            "🆔 <code>{}</code>\n👤 {}{handle}",
            user.id,
            html_escape::encode_text(&user.full_name())
        ),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

/// How many applicants `/requests` previews per chat
const PREVIEW_PER_CHAT: usize = 3;

/// `/requests` — pending counts per chat, with a short applicant preview
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn list_requests(bot: Bot, msg: Message, registry: Arc<PendingRegistry>) -> Result<()> {
    let entries = registry.snapshot();

    let mut text = String::from("📋 Pending join requests:\n");
    if entries.is_empty() {
        text.push_str("none.");
    } else {
        // snapshot() is ordered by (chat, applicant), so one pass groups it.
        let mut current_chat = None;
        let mut shown_in_chat = 0;
        for entry in &entries {
            if current_chat != Some(entry.chat_id) {
                current_chat = Some(entry.chat_id);
                shown_in_chat = 0;
                let count = entries.iter().filter(|e| e.chat_id == entry.chat_id).count();
                let title = html_escape::encode_text(&entry.chat_title);
                text.push_str(&format!(
                    "\n<b>{title}</b> (<code>{}</code>) → {count}",
                    entry.chat_id
                ));
            }
            if shown_in_chat < PREVIEW_PER_CHAT {
                let entry_label = entry.label();
                let label = html_escape::encode_text(&entry_label);
                text.push_str(&format!("\n  • {label}"));
                shown_in_chat += 1;
            } else if shown_in_chat == PREVIEW_PER_CHAT {
                text.push_str("\n  • …");
                shown_in_chat += 1;
            }
        }
    }

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// `/select` — inline keyboard of chats with pending requests
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn select_chat(bot: Bot, msg: Message, registry: Arc<PendingRegistry>) -> Result<()> {
    let counts = registry.counts_by_chat();
    if counts.is_empty() {
        bot.send_message(msg.chat.id, "No pending requests, nothing to select.")
            .await?;
        return Ok(());
    }

    let keyboard: Vec<Vec<InlineKeyboardButton>> = counts
        .iter()
        .map(|(chat_id, (title, count))| {
            vec![InlineKeyboardButton::callback(
                format!("{title} ({count} pending)"),
                format!("sel:{chat_id}"),
            )]
        })
        .collect();

    bot.send_message(msg.chat.id, "Pick a chat:")
        .reply_markup(InlineKeyboardMarkup::new(keyboard))
        .await?;
    Ok(())
}

/// Extracts the sender's user ID, or 0 for messages without one
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// `/cancel`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn cancel(bot: Bot, msg: Message, sessions: Arc<Sessions>) -> Result<()> {
    let admin_id = get_user_id_safe(&msg);
    let had_selection = sessions.clear(admin_id);
    let text = if had_selection {
        "❌ Selection cleared."
    } else {
        "Nothing was selected."
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// `/approve [cap] [chat_id]` and `/decline [cap] [chat_id]`.
///
/// Resolves the target chat (explicit argument, else the `/select`ed one),
/// then runs the bulk dispatcher while live-editing a progress message.
///
/// # Errors
///
/// Returns an error if Telegram API calls fail.
pub async fn bulk(
    bot: Bot,
    msg: Message,
    args: &str,
    action: Action,
    sessions: Arc<Sessions>,
    dispatcher: Arc<BulkDispatcher>,
) -> Result<()> {
    let admin_id = get_user_id_safe(&msg);

    let (cap, explicit_chat) = match parse_bulk_args(args) {
        Ok(parsed) => parsed,
        Err(usage) => {
            bot.send_message(msg.chat.id, usage).await?;
            return Ok(());
        }
    };

    let Some(chat_id) = explicit_chat.or_else(|| sessions.selected(admin_id)) else {
        bot.send_message(
            msg.chat.id,
            "⚠️ Select a chat first with /select, or pass a chat ID.",
        )
        .await?;
        return Ok(());
    };

    info!(
        "admin {admin_id}: bulk {} on chat {chat_id} (cap {cap:?})",
        action.verb()
    );

    let status = send_html_resilient(
        &bot,
        msg.chat.id,
        format!("⏳ Running bulk {}…", action.verb()),
        None,
    )
    .await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<BulkProgress>();
    let progress_bot = bot.clone();
    let status_chat = status.chat.id;
    let status_id = status.id;
    let verb = action.verb();

    let (report, ()) = tokio::join!(
        dispatcher.run(chat_id, cap, action, Some(tx)),
        async move {
            while let Some(p) = rx.recv().await {
                let text =
                    format!("⏳ Bulk {verb}: {} done, page {}…", p.succeeded, p.pages);
                edit_message_safe(&progress_bot, status_chat, status_id, &text).await;
            }
        }
    );

    edit_message_safe(&bot, status.chat.id, status.id, &summary(action, &report)).await;
    Ok(())
}

/// Admin-facing summary of a finished bulk run
fn summary(action: Action, report: &BulkReport) -> String {
    let verdict = match action {
        Action::Approve => format!("✅ Approved {} requests.", report.succeeded),
        Action::Decline => format!("🚫 Declined {} requests.", report.succeeded),
    };
    if report.aborted_forbidden {
        format!("{verdict}\n⛔ Stopped early: the bot lacks admin rights in that chat.")
    } else {
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bulk_args_empty() {
        assert_eq!(parse_bulk_args(""), Ok((None, None)));
    }

    #[test]
    fn test_parse_bulk_args_cap_only() {
        assert_eq!(parse_bulk_args("50"), Ok((Some(50), None)));
    }

    #[test]
    fn test_parse_bulk_args_chat_only() {
        assert_eq!(parse_bulk_args("-100123"), Ok((None, Some(-100123))));
    }

    #[test]
    fn test_parse_bulk_args_both_any_order() {
        assert_eq!(parse_bulk_args("50 -100123"), Ok((Some(50), Some(-100123))));
        assert_eq!(parse_bulk_args("-100123 50"), Ok((Some(50), Some(-100123))));
    }

    #[test]
    fn test_parse_bulk_args_rejects_garbage() {
        assert!(parse_bulk_args("fifty").is_err());
        assert!(parse_bulk_args("0").is_err());
        assert!(parse_bulk_args("1 2").is_err());
        assert!(parse_bulk_args("-1 -2").is_err());
        assert!(parse_bulk_args("-abc").is_err());
    }

    #[test]
    fn test_privileged_commands() {
        assert!(!Command::Start.is_privileged());
        assert!(!Command::Id.is_privileged());
        assert!(Command::Requests.is_privileged());
        assert!(Command::Approve(String::new()).is_privileged());
        assert!(Command::Cancel.is_privileged());
    }

    #[test]
    fn test_summary_mentions_forbidden_abort() {
        let report = BulkReport {
            succeeded: 3,
            pages: 1,
            aborted_forbidden: true,
        };
        let text = summary(Action::Approve, &report);
        assert!(text.contains('3'));
        assert!(text.contains("lacks admin rights"));
    }
}
