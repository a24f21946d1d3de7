//! Loyalty-points Telegram bot.
//!
//! Users earn points for daily logins and for linking a WhatsApp account
//! through an external QR-login provider, and can convert points into a
//! currency withdrawal gated by administrator approval.

/// Administrator action routing and pagination
pub mod admin;
/// Telegram transport: dispatch endpoints and UI rendering
pub mod bot;
/// Configuration and settings management
pub mod config;
/// Per-user conversation state machine
pub mod engine;
/// Domain error taxonomy
pub mod error;
/// Outbound notification seam
pub mod notify;
/// External login provider client
pub mod provider;
/// WhatsApp session registry
pub mod registry;
/// Transport-agnostic outbound messages
pub mod reply;
/// Persistence: users, sessions, withdrawals
pub mod store;
/// Withdrawal request workflow
pub mod withdraw;
