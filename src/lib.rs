//! Gatekeeper — a Telegram bot that manages chat join requests.
//!
//! Incoming join requests are snapshotted into an in-memory registry and
//! announced to admins, who resolve them one at a time via inline buttons
//! or in bulk via commands. Bulk runs go through a rate-limited,
//! bounded-concurrency dispatch engine that retries transient Telegram
//! failures and reports aggregate progress.

/// Remote API seam and fault taxonomy
pub mod api;
/// Telegram-facing handlers
pub mod bot;
/// Settings and tuning constants
pub mod config;
/// Bulk dispatch engine
pub mod dispatch;
/// Retrying approve/decline executor
pub mod executor;
/// Global rate limiter
pub mod limit;
/// Pending-request registry
pub mod registry;
/// Formatting and retry utilities
pub mod utils;
