/// Inline-button callbacks (selection and single-item actions)
pub mod callbacks;
/// Flood protection for unauthorized command attempts
pub mod denied;
/// Command handlers
pub mod handlers;
/// Join-request intake and admin notification
pub mod join_requests;
/// Resilient send/edit wrappers
pub mod send;
/// Per-admin chat selection
pub mod sessions;

pub use denied::DeniedCache;
