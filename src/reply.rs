//! Transport-agnostic outbound messages.
//!
//! The engine and the admin router describe what to send; the Telegram layer
//! renders keyboards and delivers.

use crate::admin::CallbackKey;

/// Main-menu button labels shared between the engine (matching) and the
/// transport (rendering).
pub mod labels {
    /// Start the WhatsApp login dialog
    pub const LOGIN: &str = "▶️ WhatsApp Login";
    /// Show the account summary
    pub const ACCOUNT: &str = "📊 My Account";
    /// Start the withdrawal dialog
    pub const WITHDRAW: &str = "💰 Withdraw";
    /// Show the referral code
    pub const REFERRAL: &str = "🎁 Referral Code";
    /// List the user's active sessions
    pub const SESSIONS: &str = "✅ Active Sessions";
    /// Admin: paginated user list
    pub const ADMIN_USERS: &str = "👁 User List";
    /// Admin: pending withdrawal requests
    pub const ADMIN_WITHDRAWALS: &str = "🧾 Withdrawal Requests";
    /// Admin: session management
    pub const ADMIN_SESSIONS: &str = "🔁 Session Management";
    /// Super admin: author a broadcast
    pub const ADMIN_BROADCAST: &str = "🔔 Broadcast";
}

/// Keyboard attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markup {
    /// The persistent reply keyboard (admin variant carries admin rows)
    MainMenu {
        /// Render the administrator rows instead of the user rows
        admin: bool,
    },
    /// Inline buttons; each carries a structured callback key
    Inline(Vec<Vec<(String, CallbackKey)>>),
}

/// One outbound message addressed to the chat whose event is being handled.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Message body
    pub text: String,
    /// Optional keyboard
    pub markup: Option<Markup>,
    /// Optional photo URL; the text becomes the caption
    pub photo_url: Option<String>,
}

impl Reply {
    /// A plain text reply.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markup: None,
            photo_url: None,
        }
    }

    /// Attach a keyboard.
    #[must_use]
    pub fn with_markup(mut self, markup: Markup) -> Self {
        self.markup = Some(markup);
        self
    }

    /// Attach a photo; the text becomes its caption.
    #[must_use]
    pub fn with_photo(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}
