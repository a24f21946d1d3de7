//! Per-user conversation engine.
//!
//! Inbound chat events look up the user's dialog state, advance it, and
//! produce outbound replies. Events for one user serialize on that user's
//! state lock; different users never block each other.

/// Dialog state definitions
pub mod state;

pub use state::DialogState;

use crate::admin::{AdminActionRouter, AdminOutcome, CallbackKey};
use crate::config::{Settings, POINTS_PER_DAILY_LOGIN, POINTS_PER_LOGIN, POINTS_PER_REFERRAL};
use crate::error::{BotError, BotResult};
use crate::notify::Notifier;
use crate::provider::{InitiateOutcome, LoginStatus};
use crate::registry::{ConfirmOutcome, SessionRegistry};
use crate::reply::{labels, Markup, Reply};
use crate::store::Store;
use crate::withdraw::WithdrawalWorkflow;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Orchestrates multi-step dialogs over the shared components.
pub struct ConversationEngine {
    store: Arc<Store>,
    registry: Arc<SessionRegistry>,
    withdrawals: Arc<WithdrawalWorkflow>,
    router: AdminActionRouter,
    notifier: Arc<dyn Notifier>,
    settings: Arc<Settings>,
    dialogs: DashMap<i64, Arc<Mutex<DialogState>>>,
}

impl ConversationEngine {
    /// Compose the engine. All collaborators are injected; the engine holds
    /// no global state.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        registry: Arc<SessionRegistry>,
        withdrawals: Arc<WithdrawalWorkflow>,
        router: AdminActionRouter,
        notifier: Arc<dyn Notifier>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            registry,
            withdrawals,
            router,
            notifier,
            settings,
            dialogs: DashMap::new(),
        }
    }

    fn dialog(&self, user_id: i64) -> Arc<Mutex<DialogState>> {
        self.dialogs.entry(user_id).or_default().value().clone()
    }

    /// Current dialog state of a user. Mainly useful in tests.
    pub async fn dialog_state(&self, user_id: i64) -> DialogState {
        let slot = self.dialog(user_id);
        let state = slot.lock().await;
        state.clone()
    }

    /// Handle `/start`: register or greet the user, grant the daily bonus at
    /// most once per UTC day, reset any dialog, and show the main menu.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn handle_start(&self, user_id: i64, username: &str) -> BotResult<Vec<Reply>> {
        let slot = self.dialog(user_id);
        let mut state = slot.lock().await;
        *state = DialogState::Idle;

        let mut replies = self.register_or_bonus(user_id, username).await?;
        replies.push(
            Reply::text("👋 Welcome! Please pick an option:").with_markup(Markup::MainMenu {
                admin: self.settings.is_admin(user_id),
            }),
        );
        Ok(replies)
    }

    /// Handle a free-text message according to the current dialog state.
    /// Main-menu labels act as dialog entry points from any state and
    /// overwrite the previous dialog.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn handle_text(
        &self,
        user_id: i64,
        username: &str,
        text: &str,
    ) -> BotResult<Vec<Reply>> {
        let slot = self.dialog(user_id);
        let mut state = slot.lock().await;

        let mut replies = self.register_or_bonus(user_id, username).await?;
        let text = text.trim();

        if let Some(mut menu) = self.menu_entry(user_id, text, &mut state).await? {
            replies.append(&mut menu);
            return Ok(replies);
        }

        let current = state.clone();
        let mut rest = match current {
            DialogState::Idle => vec![
                Reply::text("Please pick an option from the menu.").with_markup(
                    Markup::MainMenu {
                        admin: self.settings.is_admin(user_id),
                    },
                ),
            ],
            DialogState::AwaitingPhoneNumber => {
                self.on_phone_input(user_id, text, &mut state).await?
            }
            DialogState::AwaitingLoginConfirmation { .. } => vec![Reply::text(
                "Scan the QR code, then send /confirm — or /cancel to stop.",
            )],
            DialogState::AwaitingWithdrawAmount => {
                self.on_withdraw_amount(user_id, text, &mut state).await?
            }
            DialogState::AwaitingWithdrawNumber { amount, points } => {
                self.on_withdraw_number(user_id, amount, points, text, &mut state)
                    .await?
            }
            DialogState::AwaitingBroadcastText => self.on_broadcast(text, &mut state).await?,
            DialogState::AwaitingAdminSessionChoice { .. } => vec![Reply::text(
                "Use the buttons to pick a session action — or /cancel.",
            )],
        };
        replies.append(&mut rest);
        Ok(replies)
    }

    /// Handle `/confirm`: resolve a pending QR login.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn handle_confirm(&self, user_id: i64) -> BotResult<Vec<Reply>> {
        let slot = self.dialog(user_id);
        let mut state = slot.lock().await;

        let DialogState::AwaitingLoginConfirmation { phone, expires_at } = state.clone() else {
            return Ok(vec![Reply::text("Nothing to confirm right now.")]);
        };

        if Utc::now() > expires_at {
            *state = DialogState::Idle;
            self.store.record_login_failure(user_id).await?;
            return Ok(vec![Reply::text(
                "⌛️ The QR code expired. Start the login again.",
            )]);
        }

        match self.registry.confirm(user_id, &phone, POINTS_PER_LOGIN).await {
            Ok(ConfirmOutcome::Linked { new_session }) => {
                *state = DialogState::Idle;
                let mut text = format!(
                    "✅ WhatsApp logged in successfully! You earned {POINTS_PER_LOGIN} points."
                );
                if !new_session {
                    text.push_str("\n(This number was already saved for your account.)");
                }
                Ok(vec![Reply::text(text)])
            }
            Ok(ConfirmOutcome::StillPending) => Ok(vec![Reply::text(
                "⏳ Not scanned yet. Scan the QR code and send /confirm again.",
            )]),
            Ok(ConfirmOutcome::Failed) => {
                *state = DialogState::Idle;
                Ok(vec![Reply::text("❌ WhatsApp login failed. Please try again.")])
            }
            Err(BotError::InvalidInput(msg)) => {
                *state = DialogState::Idle;
                Ok(vec![Reply::text(format!("❌ Login failed: {msg}"))])
            }
            Err(e) => Err(e),
        }
    }

    /// Handle `/cancel`: discard the dialog without side effects.
    ///
    /// # Errors
    ///
    /// Infallible in practice; kept fallible for uniformity with the other
    /// handlers.
    pub async fn handle_cancel(&self, user_id: i64) -> BotResult<Vec<Reply>> {
        let slot = self.dialog(user_id);
        let mut state = slot.lock().await;

        if state.is_idle() {
            return Ok(vec![Reply::text("Nothing to cancel.")]);
        }
        *state = DialogState::Idle;
        Ok(vec![
            Reply::text("Operation cancelled.").with_markup(Markup::MainMenu {
                admin: self.settings.is_admin(user_id),
            }),
        ])
    }

    /// Handle a button callback. Malformed keys are rejected outright, and
    /// every supported verb is administrator-only.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn handle_callback(&self, user_id: i64, raw: &str) -> BotResult<Vec<Reply>> {
        let key = match CallbackKey::decode(raw) {
            Ok(key) => key,
            Err(e) => {
                warn!(user_id, raw, error = %e, "rejected malformed callback key");
                return Ok(vec![Reply::text("⚠️ Unrecognized action.")]);
            }
        };
        if !self.settings.is_admin(user_id) {
            return Ok(vec![Reply::text("⛔️ Admins only.")]);
        }

        let slot = self.dialog(user_id);
        let mut state = slot.lock().await;
        match self.router.dispatch(key).await? {
            AdminOutcome::Replies(replies) => Ok(replies),
            AdminOutcome::SessionSelected { phone, replies } => {
                *state = DialogState::AwaitingAdminSessionChoice { phone };
                Ok(replies)
            }
            AdminOutcome::SessionResolved(replies) => {
                *state = DialogState::Idle;
                Ok(replies)
            }
        }
    }

    async fn register_or_bonus(&self, user_id: i64, username: &str) -> BotResult<Vec<Reply>> {
        let today = Utc::now().date_naive();
        if self.store.get_user(user_id).await?.is_none() {
            self.store
                .create_user(user_id, username, today, POINTS_PER_DAILY_LOGIN)
                .await?;
            return Ok(vec![Reply::text(format!(
                "Welcome! You received {POINTS_PER_DAILY_LOGIN} points for your first login."
            ))]);
        }
        if self
            .store
            .claim_daily_bonus(user_id, today, POINTS_PER_DAILY_LOGIN)
            .await?
        {
            return Ok(vec![Reply::text(format!(
                "Welcome back! Today's daily login bonus: {POINTS_PER_DAILY_LOGIN} points."
            ))]);
        }
        Ok(Vec::new())
    }

    async fn menu_entry(
        &self,
        user_id: i64,
        text: &str,
        state: &mut DialogState,
    ) -> BotResult<Option<Vec<Reply>>> {
        let replies = match text {
            labels::LOGIN => {
                *state = DialogState::AwaitingPhoneNumber;
                vec![Reply::text(
                    "📞 Send your WhatsApp number with the country code (e.g. +8801712345678):",
                )]
            }
            labels::ACCOUNT => {
                *state = DialogState::Idle;
                self.account_summary(user_id).await?
            }
            labels::WITHDRAW => {
                *state = DialogState::AwaitingWithdrawAmount;
                self.withdraw_prompt(user_id).await?
            }
            labels::REFERRAL => {
                *state = DialogState::Idle;
                self.referral_reply(user_id).await?
            }
            labels::SESSIONS => {
                *state = DialogState::Idle;
                self.sessions_reply(user_id).await?
            }
            _ => return self.admin_menu_entry(user_id, text, state).await,
        };
        Ok(Some(replies))
    }

    async fn admin_menu_entry(
        &self,
        user_id: i64,
        text: &str,
        state: &mut DialogState,
    ) -> BotResult<Option<Vec<Reply>>> {
        if !self.settings.is_admin(user_id) {
            return Ok(None);
        }
        let replies = match text {
            labels::ADMIN_USERS => {
                *state = DialogState::Idle;
                self.router.users_page(0).await?
            }
            labels::ADMIN_WITHDRAWALS => {
                *state = DialogState::Idle;
                self.router.pending_withdrawals().await?
            }
            labels::ADMIN_SESSIONS => {
                *state = DialogState::Idle;
                self.router.sessions_page(0).await?
            }
            labels::ADMIN_BROADCAST => {
                if self.settings.is_super_admin(user_id) {
                    *state = DialogState::AwaitingBroadcastText;
                    vec![Reply::text("Write the message to send to every user:")]
                } else {
                    vec![Reply::text("❌ Only the super admin can broadcast.")]
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(replies))
    }

    async fn on_phone_input(
        &self,
        user_id: i64,
        text: &str,
        state: &mut DialogState,
    ) -> BotResult<Vec<Reply>> {
        if !is_plausible_phone(text) {
            return Ok(vec![Reply::text(
                "❌ That does not look like a phone number. Send it with the country code, e.g. +8801712345678:",
            )]);
        }
        match self.registry.initiate(text).await {
            Ok(InitiateOutcome::AlreadyAuthenticated) => {
                *state = DialogState::Idle;
                Ok(vec![Reply::text("✅ This number is already linked to WhatsApp.")])
            }
            Ok(InitiateOutcome::QrIssued(qr_url)) => {
                let expires_at =
                    Utc::now() + Duration::seconds(self.settings.login_confirm_timeout_secs);
                *state = DialogState::AwaitingLoginConfirmation {
                    phone: text.to_string(),
                    expires_at,
                };
                Ok(vec![Reply::text(
                    "Scan this QR code to log in to WhatsApp, then send /confirm.",
                )
                .with_photo(qr_url)])
            }
            Ok(InitiateOutcome::Conflict) => {
                *state = DialogState::Idle;
                Ok(vec![Reply::text(
                    "❌ A login for this number is already in progress. Try again later.",
                )])
            }
            Err(e) => {
                warn!(user_id, error = %e, "login initiate failed");
                *state = DialogState::Idle;
                Ok(vec![Reply::text(
                    "❌ Could not start the WhatsApp login. Try again later.",
                )])
            }
        }
    }

    async fn on_withdraw_amount(
        &self,
        user_id: i64,
        text: &str,
        state: &mut DialogState,
    ) -> BotResult<Vec<Reply>> {
        let Ok(amount) = text.parse::<f64>() else {
            return Ok(vec![Reply::text("❌ Wrong input! Numbers only.\nTry again:")]);
        };
        let min = self.withdrawals.min_amount();
        if !amount.is_finite() || amount < min {
            return Ok(vec![Reply::text(format!(
                "❌ Minimum withdrawal amount: {min:.2} BDT\nTry again:"
            ))]);
        }
        let required = self.withdrawals.required_points(amount);
        let available = self.store.balance(user_id).await?;
        if available < required {
            return Ok(vec![Reply::text(format!(
                "❌ You do not have enough points!\nRequired: {required}, you have: {available}\nTry again:"
            ))]);
        }
        *state = DialogState::AwaitingWithdrawNumber {
            amount,
            points: required,
        };
        Ok(vec![Reply::text(
            "📱 Send the bKash/Nagad/Rocket number that should receive the money:",
        )])
    }

    async fn on_withdraw_number(
        &self,
        user_id: i64,
        amount: f64,
        points: i64,
        text: &str,
        state: &mut DialogState,
    ) -> BotResult<Vec<Reply>> {
        match self.withdrawals.create(user_id, amount, text).await {
            Ok(withdrawal) => {
                *state = DialogState::Idle;
                self.notify_admins(&format!(
                    "⚠️ New withdrawal request!\nRequest: {}\nUser: {}\nAmount: {:.2} BDT\nNumber: {}",
                    withdrawal.request_id, user_id, withdrawal.amount, withdrawal.payment_number
                ))
                .await;
                Ok(vec![Reply::text(format!(
                    "✅ Your withdrawal request has been received!\n{points} points are held until an admin reviews it.\nYou will get the money within 24 hours of approval."
                ))])
            }
            Err(BotError::InsufficientBalance {
                required,
                available,
            }) => {
                *state = DialogState::Idle;
                Ok(vec![Reply::text(format!(
                    "❌ Your balance changed: {required} points required, {available} available. The request was not created."
                ))])
            }
            Err(e) => Err(e),
        }
    }

    async fn on_broadcast(&self, text: &str, state: &mut DialogState) -> BotResult<Vec<Reply>> {
        let ids = self.store.user_ids().await?;
        let mut delivered = 0_u32;
        let mut failed = 0_u32;
        for id in ids {
            match self.notifier.notify(id, text).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    warn!(user_id = id, error = %e, "broadcast delivery failed");
                }
            }
        }
        *state = DialogState::Idle;
        info!(delivered, failed, "broadcast finished");
        Ok(vec![Reply::text(format!(
            "✅ Broadcast finished!\n\nDelivered: {delivered}\nFailed: {failed}"
        ))])
    }

    async fn account_summary(&self, user_id: i64) -> BotResult<Vec<Reply>> {
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(vec![Reply::text("Send /start first.")]);
        };
        let sessions = self.store.active_session_count(user_id).await?;
        Ok(vec![Reply::text(format!(
            "📊 Your account\n\n💰 Points balance: {}\n🔗 Active sessions: {}\n✅ Successful logins: {}\n❌ Failed logins: {}\n\n🎁 Your referral code:\n{}",
            user.points, sessions, user.successful_logins, user.failed_logins, user.referral_code
        ))])
    }

    async fn referral_reply(&self, user_id: i64) -> BotResult<Vec<Reply>> {
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(vec![Reply::text("Send /start first.")]);
        };
        Ok(vec![Reply::text(format!(
            "🎁 Your referral code:\n\n{}\n\nShare this code with new users — every successful referral is worth {POINTS_PER_REFERRAL} points.",
            user.referral_code
        ))])
    }

    async fn sessions_reply(&self, user_id: i64) -> BotResult<Vec<Reply>> {
        let sessions = self.registry.list(user_id).await?;
        if sessions.is_empty() {
            return Ok(vec![Reply::text("You have no active sessions.")]);
        }
        let mut text = String::from("📱 Your active sessions:\n\n");
        for (i, (session, status)) in sessions.iter().enumerate() {
            let status_label = match status {
                Some(LoginStatus::Authenticated) => "online",
                Some(LoginStatus::Pending) => "pending",
                Some(LoginStatus::NotFound) => "unknown",
                None => "unreachable",
            };
            text.push_str(&format!(
                "{}. {} — {} [{}]\n",
                i + 1,
                session.phone_number,
                session.created_at.format("%Y-%m-%d %H:%M"),
                status_label
            ));
        }
        Ok(vec![Reply::text(text)])
    }

    async fn withdraw_prompt(&self, user_id: i64) -> BotResult<Vec<Reply>> {
        let balance = self.store.balance(user_id).await?;
        let units = balance as f64 / self.settings.points_per_unit as f64;
        Ok(vec![Reply::text(format!(
            "💰 Your balance: {balance} points ({units:.2} BDT)\n\nWithdrawals start at {:.2} BDT.\nEnter the amount to withdraw (in BDT):",
            self.withdrawals.min_amount()
        ))])
    }

    async fn notify_admins(&self, text: &str) {
        for admin_id in self.settings.admin_ids() {
            if let Err(e) = self.notifier.notify(admin_id, text).await {
                warn!(admin_id, error = %e, "failed to notify admin");
            }
        }
    }
}

/// Minimal shape check: an international prefix marker followed by digits.
fn is_plausible_phone(text: &str) -> bool {
    let Some(rest) = text.strip_prefix('+') else {
        return false;
    };
    rest.len() >= 7 && rest.chars().all(|c| c.is_ascii_digit())
}
