//! Outbound notification boundary.
//!
//! Fired after booking approval; delivery success never affects stored
//! booking state.

use async_trait::async_trait;

use crate::error::NotifyError;

/// Sends a text message to a phone number through the (out-of-scope)
/// messaging transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, phone: &str, body: &str) -> Result<(), NotifyError>;
}

/// Logs notifications instead of sending them. Default for local runs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(&self, phone: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(%phone, %body, "Notification (log only)");
        Ok(())
    }
}
