//! Resilient Telegram messaging.
//!
//! Wrappers around send/edit that retry transient network failures with
//! exponential backoff, and degrade gracefully on the edit errors that are
//! expected during progress updates ("not modified", "not found").

use crate::utils;
use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, MessageId, ParseMode, ReplyMarkup};
use tracing::{debug, warn};

/// Sends an HTML message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_html_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    markup: Option<ReplyMarkup>,
) -> Result<Message> {
    let text = text.into();
    utils::retry_telegram_operation(|| async {
        let mut req = bot
            .send_message(chat_id, text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = markup.clone() {
            req = req.reply_markup(markup);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edits a message, retrying transient failures and swallowing the edit
/// errors that just mean there is nothing to do.
///
/// Returns whether the edit went through.
pub async fn edit_message_safe(bot: &Bot, chat_id: ChatId, msg_id: MessageId, text: &str) -> bool {
    const ERROR_NOT_MODIFIED: &str = "message is not modified";
    const ERROR_NOT_FOUND: &str = "message to edit not found";

    let result = utils::retry_telegram_operation(|| async {
        bot.edit_message_text(chat_id, msg_id, text.to_string())
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await;

    match result {
        Ok(_) => true,
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains(ERROR_NOT_MODIFIED) || err_msg.contains(ERROR_NOT_FOUND) {
                debug!("Message update skipped: {err_msg}");
            } else {
                warn!("Failed to edit message after retries: {e}");
            }
            false
        }
    }
}
