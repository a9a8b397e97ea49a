//! Utility functions for message formatting and resilient Telegram calls.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Safely truncates a string to a maximum character length (not bytes).
///
/// UTF-8 safe; will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use gatekeeper_bot::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Builds an HTML mention link for a user.
///
/// The display name is HTML-escaped; the link works even for users without
/// a public @username.
///
/// # Examples
///
/// ```
/// use gatekeeper_bot::utils::mention_html;
/// assert_eq!(
///     mention_html(42, "Ada <3"),
///     "<a href=\"tg://user?id=42\">Ada &lt;3</a>"
/// );
/// ```
#[must_use]
pub fn mention_html(user_id: i64, name: &str) -> String {
    let escaped = html_escape::encode_text(name);
    format!("<a href=\"tg://user?id={user_id}\">{escaped}</a>")
}

/// Renders the welcome template, substituting `{mention}` with the new
/// member's mention link.
#[must_use]
pub fn render_template(template: &str, mention: &str) -> String {
    template.replace("{mention}", mention)
}

/// Retry a Telegram API operation with exponential backoff.
///
/// For admin-facing sends and edits that may fail on transient network
/// errors. Exponential backoff with jitter avoids thundering herd; bounds
/// come from `config.rs`.
///
/// # Errors
///
/// Returns the last error if all attempts fail.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 50), "Привет, мир!");
    }

    #[test]
    fn test_mention_escapes_name() {
        let mention = mention_html(7, "a<b>&c");
        assert!(mention.contains("tg://user?id=7"));
        assert!(!mention.contains("<b>"));
        assert!(mention.contains("a&lt;b&gt;&amp;c"));
    }

    #[test]
    fn test_render_template() {
        let out = render_template("Welcome, {mention}! Read the rules.", "<a>X</a>");
        assert_eq!(out, "Welcome, <a>X</a>! Read the rules.");
    }

    #[test]
    fn test_render_template_without_placeholder() {
        assert_eq!(render_template("Hi there", "X"), "Hi there");
    }
}
