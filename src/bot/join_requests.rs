//! Join-request intake.
//!
//! Every incoming `chat_join_request` update is snapshotted into the
//! registry and announced to each configured admin with inline
//! approve/decline buttons. Notification delivery is best effort: one
//! unreachable admin never blocks the others.

use crate::bot::send::send_html_resilient;
use crate::config::Settings;
use crate::registry::{PendingRegistry, PendingRequest};
use crate::utils::truncate_str;
use anyhow::Result;
use futures_util::future::join_all;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{
    ChatJoinRequest, InlineKeyboardButton, InlineKeyboardMarkup, ReplyMarkup,
};
use tracing::{info, warn};

/// Longest applicant/chat name rendered into admin notifications
const NAME_LIMIT: usize = 64;

/// Handles one incoming join request: record, then notify admins.
///
/// # Errors
///
/// Infallible in practice; failures to reach individual admins are logged
/// and swallowed.
pub async fn on_join_request(
    bot: Bot,
    req: ChatJoinRequest,
    registry: Arc<PendingRegistry>,
    settings: Arc<Settings>,
) -> Result<()> {
    let request = PendingRequest {
        user_id: req.from.id.0.cast_signed(),
        chat_id: req.chat.id.0,
        chat_title: req.chat.title().unwrap_or("<unnamed>").to_string(),
        full_name: req.from.full_name(),
        username: req.from.username.clone(),
    };

    info!(
        "join request from {} ({}) for chat {} ({})",
        request.label(),
        request.user_id,
        request.chat_title,
        request.chat_id
    );
    registry.record(request.clone());

    let text = notification_text(&request);
    let markup = action_keyboard(request.chat_id, request.user_id);

    let sends = settings.admin_ids().into_iter().map(|admin_id| {
        let bot = bot.clone();
        let text = text.clone();
        let markup = markup.clone();
        async move {
            if let Err(e) = send_html_resilient(
                &bot,
                ChatId(admin_id),
                text,
                Some(ReplyMarkup::InlineKeyboard(markup)),
            )
            .await
            {
                warn!("failed to notify admin {admin_id}: {e}");
            }
        }
    });
    join_all(sends).await;

    Ok(())
}

/// Admin notification body for one pending request
#[must_use]
pub fn notification_text(request: &PendingRequest) -> String {
    let name = html_escape::encode_text(&truncate_str(&request.full_name, NAME_LIMIT)).to_string();
    let handle = request
        .username
        .as_deref()
        .map_or_else(String::new, |u| format!(" (@{u})"));
    let title = html_escape::encode_text(&truncate_str(&request.chat_title, NAME_LIMIT)).to_string();
    format!(
        "📩 New join request\n👤 {name}{handle} — <code>{}</code>\n💬 {title} — <code>{}</code>",
        request.user_id, request.chat_id
    )
}

/// Approve/decline buttons for one (chat, applicant) pair
#[must_use]
pub fn action_keyboard(chat_id: i64, user_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Approve", format!("ok:{chat_id}:{user_id}")),
        InlineKeyboardButton::callback("🚫 Decline", format!("no:{chat_id}:{user_id}")),
    ]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PendingRequest {
        PendingRequest {
            user_id: 42,
            chat_id: -100123,
            chat_title: "Rustaceans <3".to_string(),
            full_name: "Ada L.".to_string(),
            username: Some("ada".to_string()),
        }
    }

    #[test]
    fn test_notification_text_escapes_and_names() {
        let text = notification_text(&request());
        assert!(text.contains("Ada L."));
        assert!(text.contains("(@ada)"));
        assert!(text.contains("<code>42</code>"));
        assert!(text.contains("Rustaceans &lt;3"));
    }

    #[test]
    fn test_notification_text_without_username() {
        let mut req = request();
        req.username = None;
        let text = notification_text(&req);
        assert!(!text.contains("(@"));
    }
}
