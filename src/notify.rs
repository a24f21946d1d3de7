//! Outbound notification seam.
//!
//! Side-channel messages (admin alerts, withdrawal verdicts, broadcasts)
//! target users other than the one whose event is being handled, so they go
//! through this trait rather than the per-event reply path.

use crate::error::{BotError, BotResult};
use async_trait::async_trait;
use teloxide::prelude::*;

/// Best-effort message delivery to a single user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to the user's chat. Failures are reported, never
    /// retried here.
    async fn notify(&self, user_id: i64, text: &str) -> BotResult<()>;
}

/// Delivers notifications through the Telegram Bot API.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    /// Wrap a bot handle.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, user_id: i64, text: &str) -> BotResult<()> {
        self.bot
            .send_message(ChatId(user_id), text)
            .await
            .map(|_| ())
            .map_err(|e| BotError::NotificationFailure(e.to_string()))
    }
}
