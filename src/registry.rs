//! Session registry: the single owner of session semantics, composing the
//! persisted session rows with live provider probes.

use crate::error::BotResult;
use crate::provider::{InitiateOutcome, LoginProvider, LoginStatus};
use crate::store::{Session, Store};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// Outcome of a user-driven login confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The account is linked; the reward was credited.
    Linked {
        /// Whether a new session row was created (false: row already existed)
        new_session: bool,
    },
    /// The QR code has not been scanned yet; nothing changed.
    StillPending,
    /// The provider reported failure; the failure counter was bumped.
    Failed,
}

/// Tracks authenticated external-login sessions per user/phone pair.
pub struct SessionRegistry {
    store: Arc<Store>,
    provider: Arc<dyn LoginProvider>,
}

impl SessionRegistry {
    /// Compose the registry over the shared store and provider.
    #[must_use]
    pub fn new(store: Arc<Store>, provider: Arc<dyn LoginProvider>) -> Self {
        Self { store, provider }
    }

    /// Start a provider login flow for a phone number.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` when the provider call fails.
    pub async fn initiate(&self, phone: &str) -> BotResult<InitiateOutcome> {
        self.provider.initiate(phone).await
    }

    /// Probe the provider's live status for a phone number.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` when the provider call fails.
    pub async fn status(&self, phone: &str) -> BotResult<LoginStatus> {
        self.provider.status(phone).await
    }

    /// Resolve a pending login: probe the provider and, on authentication,
    /// persist the session and the reward in one transaction. A provider
    /// failure or a non-pending non-authenticated status counts as a failed
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns an error only on database failure; provider trouble maps to
    /// `ConfirmOutcome::Failed`.
    pub async fn confirm(&self, user_id: i64, phone: &str, reward: i64) -> BotResult<ConfirmOutcome> {
        let status = match self.provider.status(phone).await {
            Ok(status) => status,
            Err(e) => {
                warn!(user_id, phone, error = %e, "status probe failed during confirm");
                self.store.record_login_failure(user_id).await?;
                return Ok(ConfirmOutcome::Failed);
            }
        };

        match status {
            LoginStatus::Authenticated => {
                let (_, new_session) = self
                    .store
                    .record_confirmed_login(user_id, phone, reward, Utc::now())
                    .await?;
                Ok(ConfirmOutcome::Linked { new_session })
            }
            LoginStatus::Pending => Ok(ConfirmOutcome::StillPending),
            LoginStatus::NotFound => {
                self.store.record_login_failure(user_id).await?;
                Ok(ConfirmOutcome::Failed)
            }
        }
    }

    /// Active sessions for a user, each annotated with a live status probe.
    /// The probe is never cached; a probe failure annotates the entry with
    /// `None` instead of failing the listing.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn list(&self, user_id: i64) -> BotResult<Vec<(Session, Option<LoginStatus>)>> {
        let sessions = self.store.active_sessions(user_id).await?;
        let mut annotated = Vec::with_capacity(sessions.len());
        for session in sessions {
            let status = match self.provider.status(&session.phone_number).await {
                Ok(status) => Some(status),
                Err(e) => {
                    warn!(phone = %session.phone_number, error = %e, "status probe failed");
                    None
                }
            };
            annotated.push((session, status));
        }
        Ok(annotated)
    }

    /// Revoke the provider-side session, and only on provider success mark
    /// the row inactive. Provider failure leaves the row untouched.
    ///
    /// # Errors
    ///
    /// Returns `ProviderUnavailable` when the provider call itself fails.
    pub async fn terminate(&self, phone: &str) -> BotResult<bool> {
        let revoked = self.provider.terminate(phone).await?;
        if !revoked {
            return Ok(false);
        }
        self.store.deactivate_session(phone).await?;
        Ok(true)
    }

    /// Every phone number with a session row, for administrator listings.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn all_phones(&self) -> BotResult<Vec<String>> {
        self.store.all_session_phones().await
    }
}
