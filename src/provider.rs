//! Client for the external WhatsApp login provider.
//!
//! The provider performs QR-based account linking and reports per-phone
//! session status over a small HTTP API.

use crate::error::{BotError, BotResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::warn;

/// Result of asking the provider to start a login flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateOutcome {
    /// The phone is already linked; nothing to scan.
    AlreadyAuthenticated,
    /// A QR code was issued; the user must scan it.
    QrIssued(String),
    /// Another login for this phone is already in progress.
    Conflict,
}

/// Live status of a login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    /// The QR code was scanned and the account is linked.
    Authenticated,
    /// Still waiting for the scan.
    Pending,
    /// The provider knows nothing about this phone.
    NotFound,
}

/// Contract with the external login provider.
#[async_trait]
pub trait LoginProvider: Send + Sync {
    /// Start a login flow for a phone number.
    async fn initiate(&self, phone: &str) -> BotResult<InitiateOutcome>;

    /// Probe the current status of a login flow.
    async fn status(&self, phone: &str) -> BotResult<LoginStatus>;

    /// Revoke the provider-side session. Returns whether the provider
    /// confirmed the revocation.
    async fn terminate(&self, phone: &str) -> BotResult<bool>;
}

#[derive(Debug, Deserialize)]
struct InitiateResponse {
    #[serde(default)]
    qr_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

/// HTTP implementation speaking the provider's REST contract.
pub struct HttpLoginProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLoginProvider {
    /// Build a client against the given base URL (no trailing slash).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn unavailable(err: &reqwest::Error) -> BotError {
        BotError::ProviderUnavailable(err.to_string())
    }
}

#[async_trait]
impl LoginProvider for HttpLoginProvider {
    async fn initiate(&self, phone: &str) -> BotResult<InitiateOutcome> {
        let response = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&serde_json::json!({ "phone": phone }))
            .send()
            .await
            .map_err(|e| Self::unavailable(&e))?;

        match response.status() {
            StatusCode::CONFLICT => Ok(InitiateOutcome::Conflict),
            status if status.is_success() => {
                let body: InitiateResponse =
                    response.json().await.map_err(|e| Self::unavailable(&e))?;
                if body.status.as_deref() == Some("authenticated") {
                    return Ok(InitiateOutcome::AlreadyAuthenticated);
                }
                body.qr_url.map(InitiateOutcome::QrIssued).ok_or_else(|| {
                    BotError::ProviderUnavailable(
                        "initiate response carried neither status nor QR".to_string(),
                    )
                })
            }
            status => {
                warn!(phone, %status, "login provider rejected initiate");
                Err(BotError::ProviderUnavailable(format!(
                    "initiate returned {status}"
                )))
            }
        }
    }

    async fn status(&self, phone: &str) -> BotResult<LoginStatus> {
        let response = self
            .client
            .get(format!("{}/sessions/{phone}/status", self.base_url))
            .send()
            .await
            .map_err(|e| Self::unavailable(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(LoginStatus::NotFound);
        }
        if !response.status().is_success() {
            return Err(BotError::ProviderUnavailable(format!(
                "status returned {}",
                response.status()
            )));
        }

        let body: StatusResponse = response.json().await.map_err(|e| Self::unavailable(&e))?;
        Ok(match body.status.as_str() {
            "authenticated" => LoginStatus::Authenticated,
            "pending_qr" | "pending" => LoginStatus::Pending,
            _ => LoginStatus::NotFound,
        })
    }

    async fn terminate(&self, phone: &str) -> BotResult<bool> {
        let response = self
            .client
            .delete(format!("{}/sessions/{phone}", self.base_url))
            .send()
            .await
            .map_err(|e| Self::unavailable(&e))?;
        Ok(response.status().is_success())
    }
}
