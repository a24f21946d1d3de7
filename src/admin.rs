//! Administrator action routing: structured callback keys, pagination, and
//! per-item action dispatch over the shared store, registry, and workflow.

use crate::error::{BotError, BotResult};
use crate::provider::LoginStatus;
use crate::registry::SessionRegistry;
use crate::reply::{Markup, Reply};
use crate::store::Store;
use crate::withdraw::WithdrawalWorkflow;
use std::fmt;
use std::sync::Arc;

/// A bounded window over an ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items inside the window
    pub items: Vec<T>,
    /// Zero-based page index this window was cut for
    pub index: usize,
    /// Whether a previous page exists
    pub has_prev: bool,
    /// Whether a next page exists
    pub has_next: bool,
}

/// Cut the window `[index * size, index * size + size)` out of `items`.
/// An out-of-range index yields an empty window with correct flags.
#[must_use]
pub fn paginate<T: Clone>(items: &[T], page_index: usize, page_size: usize) -> Page<T> {
    let start = page_index.saturating_mul(page_size);
    let end = start.saturating_add(page_size).min(items.len());
    let window = if page_size == 0 || start >= items.len() {
        Vec::new()
    } else {
        items[start..end].to_vec()
    };
    Page {
        items: window,
        index: page_index,
        has_prev: page_index > 0 && !items.is_empty(),
        has_next: end < items.len(),
    }
}

/// Number of pages needed for `len` items at `page_size` per page.
#[must_use]
pub const fn page_count(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        0
    } else {
        len.div_ceil(page_size)
    }
}

/// Listing a callback key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Administrator user listing
    Users,
    /// Withdrawal review
    Withdrawals,
    /// Session management
    Sessions,
}

impl Namespace {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Withdrawals => "withdrawals",
            Self::Sessions => "sessions",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "users" => Some(Self::Users),
            "withdrawals" => Some(Self::Withdrawals),
            "sessions" => Some(Self::Sessions),
            _ => None,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured button-callback key: `{namespace}:{verb}:{payload}`.
///
/// Decoding is strict; malformed keys are rejected instead of being routed
/// to the nearest-looking handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackKey {
    /// Navigate a listing to the given page
    Page {
        /// Which listing
        ns: Namespace,
        /// Target page, zero-based
        index: usize,
    },
    /// Select one item of a listing
    Select {
        /// Which listing
        ns: Namespace,
        /// Item identifier (user ID or phone number)
        payload: String,
    },
    /// Approve a withdrawal request
    Approve {
        /// Request row ID
        request_id: i64,
    },
    /// Decline a withdrawal request
    Decline {
        /// Request row ID
        request_id: i64,
    },
    /// Probe the live status of a session
    SessionStatus {
        /// Phone number of the session
        phone: String,
    },
    /// Revoke a session via the provider
    SessionLogout {
        /// Phone number of the session
        phone: String,
    },
    /// Leave the session-action menu without acting
    SessionCancel,
}

impl CallbackKey {
    /// Encode the key into callback data.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Page { ns, index } => format!("{ns}:page:{index}"),
            Self::Select { ns, payload } => format!("{ns}:select:{payload}"),
            Self::Approve { request_id } => format!("withdrawals:approve:{request_id}"),
            Self::Decline { request_id } => format!("withdrawals:decline:{request_id}"),
            Self::SessionStatus { phone } => format!("sessions:status:{phone}"),
            Self::SessionLogout { phone } => format!("sessions:logout:{phone}"),
            Self::SessionCancel => "sessions:cancel:-".to_string(),
        }
    }

    /// Decode callback data, rejecting anything that is not a well-formed
    /// key with a known namespace/verb pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for malformed keys.
    pub fn decode(raw: &str) -> BotResult<Self> {
        let malformed = || BotError::InvalidInput(format!("malformed callback key: {raw}"));

        let mut parts = raw.splitn(3, ':');
        let ns = parts
            .next()
            .and_then(Namespace::parse)
            .ok_or_else(malformed)?;
        let verb = parts.next().ok_or_else(malformed)?;
        let payload = parts.next().ok_or_else(malformed)?;

        match (ns, verb) {
            (_, "page") => {
                let index = payload.parse::<usize>().map_err(|_| malformed())?;
                Ok(Self::Page { ns, index })
            }
            (Namespace::Users | Namespace::Sessions, "select") => {
                if payload.is_empty() {
                    return Err(malformed());
                }
                Ok(Self::Select {
                    ns,
                    payload: payload.to_string(),
                })
            }
            (Namespace::Withdrawals, "approve") => {
                let request_id = payload.parse::<i64>().map_err(|_| malformed())?;
                Ok(Self::Approve { request_id })
            }
            (Namespace::Withdrawals, "decline") => {
                let request_id = payload.parse::<i64>().map_err(|_| malformed())?;
                Ok(Self::Decline { request_id })
            }
            (Namespace::Sessions, "status") => {
                if payload.is_empty() {
                    return Err(malformed());
                }
                Ok(Self::SessionStatus {
                    phone: payload.to_string(),
                })
            }
            (Namespace::Sessions, "logout") => {
                if payload.is_empty() {
                    return Err(malformed());
                }
                Ok(Self::SessionLogout {
                    phone: payload.to_string(),
                })
            }
            (Namespace::Sessions, "cancel") => Ok(Self::SessionCancel),
            _ => Err(malformed()),
        }
    }
}

/// What a dispatched admin action means for the caller's dialog state.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminOutcome {
    /// Plain replies; dialog state untouched
    Replies(Vec<Reply>),
    /// A session was selected; the admin should pick an action next
    SessionSelected {
        /// Phone number of the selected session
        phone: String,
        /// Replies carrying the action keyboard
        replies: Vec<Reply>,
    },
    /// A session action finished (or was cancelled); back to idle
    SessionResolved(Vec<Reply>),
}

/// Paginated listings and per-item action dispatch for administrators.
pub struct AdminActionRouter {
    store: Arc<Store>,
    registry: Arc<SessionRegistry>,
    withdrawals: Arc<WithdrawalWorkflow>,
    page_size: usize,
}

impl AdminActionRouter {
    /// Compose the router over the shared components.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        registry: Arc<SessionRegistry>,
        withdrawals: Arc<WithdrawalWorkflow>,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            registry,
            withdrawals,
            page_size,
        }
    }

    /// Dispatch one decoded callback key.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure; expected workflow rejections
    /// (already-processed requests) become replies instead.
    pub async fn dispatch(&self, key: CallbackKey) -> BotResult<AdminOutcome> {
        match key {
            CallbackKey::Page {
                ns: Namespace::Users,
                index,
            } => Ok(AdminOutcome::Replies(self.users_page(index).await?)),
            CallbackKey::Page {
                ns: Namespace::Sessions,
                index,
            } => Ok(AdminOutcome::Replies(self.sessions_page(index).await?)),
            CallbackKey::Page {
                ns: Namespace::Withdrawals,
                ..
            } => Ok(AdminOutcome::Replies(self.pending_withdrawals().await?)),
            CallbackKey::Select {
                ns: Namespace::Sessions,
                payload,
            } => Ok(self.select_session(payload)),
            CallbackKey::Select { payload, .. } => Ok(AdminOutcome::Replies(
                self.user_details(&payload).await?,
            )),
            CallbackKey::Approve { request_id } => {
                Ok(AdminOutcome::Replies(self.approve(request_id).await?))
            }
            CallbackKey::Decline { request_id } => {
                Ok(AdminOutcome::Replies(self.decline(request_id).await?))
            }
            CallbackKey::SessionStatus { phone } => {
                Ok(AdminOutcome::SessionResolved(self.session_status(&phone).await?))
            }
            CallbackKey::SessionLogout { phone } => {
                Ok(AdminOutcome::SessionResolved(self.session_logout(&phone).await?))
            }
            CallbackKey::SessionCancel => Ok(AdminOutcome::SessionResolved(vec![Reply::text(
                "Session action cancelled.",
            )])),
        }
    }

    /// One page of the user listing with selection and navigation buttons.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn users_page(&self, index: usize) -> BotResult<Vec<Reply>> {
        let users = self.store.list_users().await?;
        if users.is_empty() {
            return Ok(vec![Reply::text("No users registered yet.")]);
        }
        let entries: Vec<(String, CallbackKey)> = users
            .iter()
            .map(|u| {
                (
                    format!("{} ({} pts)", u.username, u.points),
                    CallbackKey::Select {
                        ns: Namespace::Users,
                        payload: u.user_id.to_string(),
                    },
                )
            })
            .collect();
        Ok(vec![self.listing_reply(
            &format!("👥 User list (page {})", index + 1),
            &entries,
            Namespace::Users,
            index,
        )])
    }

    /// One page of the session-management phone listing.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn sessions_page(&self, index: usize) -> BotResult<Vec<Reply>> {
        let phones = self.registry.all_phones().await?;
        if phones.is_empty() {
            return Ok(vec![Reply::text("No saved sessions.")]);
        }
        let entries: Vec<(String, CallbackKey)> = phones
            .iter()
            .map(|phone| {
                (
                    phone.clone(),
                    CallbackKey::Select {
                        ns: Namespace::Sessions,
                        payload: phone.clone(),
                    },
                )
            })
            .collect();
        Ok(vec![self.listing_reply(
            &format!("🔁 Session management (page {})\n\nPick a number:", index + 1),
            &entries,
            Namespace::Sessions,
            index,
        )])
    }

    /// Every pending withdrawal, each with approve/decline buttons.
    ///
    /// # Errors
    ///
    /// Returns an error on database failure.
    pub async fn pending_withdrawals(&self) -> BotResult<Vec<Reply>> {
        let pending = self.withdrawals.pending().await?;
        if pending.is_empty() {
            return Ok(vec![Reply::text("✅ No pending withdrawal requests.")]);
        }
        let replies = pending
            .iter()
            .map(|w| {
                let text = format!(
                    "🆔 Request {}\n👤 User {}\n💰 Amount: {:.2}\n📱 Number: {}",
                    w.request_id, w.user_id, w.amount, w.payment_number
                );
                Reply::text(text).with_markup(Markup::Inline(vec![vec![
                    (
                        "✅ Approve".to_string(),
                        CallbackKey::Approve {
                            request_id: w.request_id,
                        },
                    ),
                    (
                        "❌ Decline".to_string(),
                        CallbackKey::Decline {
                            request_id: w.request_id,
                        },
                    ),
                ]]))
            })
            .collect();
        Ok(replies)
    }

    fn select_session(&self, phone: String) -> AdminOutcome {
        let keyboard = Markup::Inline(vec![
            vec![
                (
                    "🔍 Check status".to_string(),
                    CallbackKey::SessionStatus {
                        phone: phone.clone(),
                    },
                ),
                (
                    "🚪 Log out".to_string(),
                    CallbackKey::SessionLogout {
                        phone: phone.clone(),
                    },
                ),
            ],
            vec![("⬅️ Cancel".to_string(), CallbackKey::SessionCancel)],
        ]);
        let replies = vec![
            Reply::text(format!("Session {phone} — pick an action:")).with_markup(keyboard),
        ];
        AdminOutcome::SessionSelected { phone, replies }
    }

    async fn user_details(&self, payload: &str) -> BotResult<Vec<Reply>> {
        let user_id = payload
            .parse::<i64>()
            .map_err(|_| BotError::InvalidInput(format!("malformed user id: {payload}")))?;
        let Some(user) = self.store.get_user(user_id).await? else {
            return Ok(vec![Reply::text("User not found.")]);
        };
        let sessions = self.store.active_session_count(user_id).await?;
        Ok(vec![Reply::text(format!(
            "👤 {}\n💰 {} points\n🔗 {} active session(s)\n✅ {} successful / ❌ {} failed logins",
            user.username, user.points, sessions, user.successful_logins, user.failed_logins
        ))])
    }

    async fn approve(&self, request_id: i64) -> BotResult<Vec<Reply>> {
        match self.withdrawals.approve(request_id).await {
            Ok(w) => Ok(vec![Reply::text(format!(
                "✅ Request {} approved.",
                w.request_id
            ))]),
            Err(BotError::AlreadyProcessed(id)) => Ok(vec![Reply::text(format!(
                "⚠️ Request {id} was already processed."
            ))]),
            Err(BotError::InvalidInput(msg)) => Ok(vec![Reply::text(format!("⚠️ {msg}"))]),
            Err(e) => Err(e),
        }
    }

    async fn decline(&self, request_id: i64) -> BotResult<Vec<Reply>> {
        match self.withdrawals.decline(request_id).await {
            Ok(w) => Ok(vec![Reply::text(format!(
                "❌ Request {} declined; {} points refunded.",
                w.request_id, w.points_held
            ))]),
            Err(BotError::AlreadyProcessed(id)) => Ok(vec![Reply::text(format!(
                "⚠️ Request {id} was already processed."
            ))]),
            Err(BotError::InvalidInput(msg)) => Ok(vec![Reply::text(format!("⚠️ {msg}"))]),
            Err(e) => Err(e),
        }
    }

    async fn session_status(&self, phone: &str) -> BotResult<Vec<Reply>> {
        match self.registry.status(phone).await {
            Ok(LoginStatus::Authenticated) => Ok(vec![Reply::text(format!(
                "✅ Session {phone} is authenticated."
            ))]),
            Ok(LoginStatus::Pending) => Ok(vec![Reply::text(format!(
                "⏳ Session {phone} is awaiting a QR scan."
            ))]),
            Ok(LoginStatus::NotFound) => Ok(vec![Reply::text(format!(
                "❓ The provider has no session for {phone}."
            ))]),
            Err(e) => Ok(vec![Reply::text(format!("⚠️ Status probe failed: {e}"))]),
        }
    }

    async fn session_logout(&self, phone: &str) -> BotResult<Vec<Reply>> {
        match self.registry.terminate(phone).await {
            Ok(true) => Ok(vec![Reply::text(format!(
                "🚪 Session {phone} logged out and marked inactive."
            ))]),
            Ok(false) => Ok(vec![Reply::text(format!(
                "⚠️ The provider refused to log out {phone}; the session stays active."
            ))]),
            Err(e) => Ok(vec![Reply::text(format!("⚠️ Logout failed: {e}"))]),
        }
    }

    fn listing_reply(
        &self,
        title: &str,
        entries: &[(String, CallbackKey)],
        ns: Namespace,
        index: usize,
    ) -> Reply {
        let page = paginate(entries, index, self.page_size);
        let mut rows: Vec<Vec<(String, CallbackKey)>> =
            page.items.into_iter().map(|entry| vec![entry]).collect();

        let mut nav = Vec::new();
        if page.has_prev {
            nav.push((
                "◀️ Prev".to_string(),
                CallbackKey::Page {
                    ns,
                    index: index.saturating_sub(1),
                },
            ));
        }
        if page.has_next {
            nav.push((
                "Next ▶️".to_string(),
                CallbackKey::Page {
                    ns,
                    index: index + 1,
                },
            ));
        }
        if !nav.is_empty() {
            rows.push(nav);
        }

        Reply::text(title).with_markup(Markup::Inline(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_windows_and_flags() {
        let items: Vec<i32> = (0..12).collect();

        let first = paginate(&items, 0, 5);
        assert_eq!(first.items, vec![0, 1, 2, 3, 4]);
        assert!(!first.has_prev);
        assert!(first.has_next);

        let middle = paginate(&items, 1, 5);
        assert_eq!(middle.items, vec![5, 6, 7, 8, 9]);
        assert!(middle.has_prev);
        assert!(middle.has_next);

        let last = paginate(&items, 2, 5);
        assert_eq!(last.items, vec![10, 11]);
        assert!(last.has_prev);
        assert!(!last.has_next);
    }

    #[test]
    fn pagination_out_of_range_is_empty() {
        let items: Vec<i32> = (0..12).collect();
        let beyond = paginate(&items, 7, 5);
        assert!(beyond.items.is_empty());
        assert!(beyond.has_prev);
        assert!(!beyond.has_next);

        let none: Vec<i32> = Vec::new();
        let empty = paginate(&none, 0, 5);
        assert!(empty.items.is_empty());
        assert!(!empty.has_prev);
        assert!(!empty.has_next);
    }

    #[test]
    fn page_count_is_ceil() {
        assert_eq!(page_count(0, 5), 0);
        assert_eq!(page_count(1, 5), 1);
        assert_eq!(page_count(5, 5), 1);
        assert_eq!(page_count(6, 5), 2);
        assert_eq!(page_count(12, 5), 3);
        assert_eq!(page_count(12, 0), 0);
    }

    #[test]
    fn callback_keys_round_trip() {
        let keys = [
            CallbackKey::Page {
                ns: Namespace::Users,
                index: 3,
            },
            CallbackKey::Select {
                ns: Namespace::Sessions,
                payload: "+8801712345678".to_string(),
            },
            CallbackKey::Approve { request_id: 42 },
            CallbackKey::Decline { request_id: 7 },
            CallbackKey::SessionStatus {
                phone: "+8801712345678".to_string(),
            },
            CallbackKey::SessionLogout {
                phone: "+8801712345678".to_string(),
            },
            CallbackKey::SessionCancel,
        ];
        for key in keys {
            let encoded = key.encode();
            let decoded = CallbackKey::decode(&encoded).expect("round trip");
            assert_eq!(decoded, key, "key {encoded} did not round-trip");
        }
    }

    #[test]
    fn malformed_callback_keys_are_rejected() {
        for raw in [
            "",
            "users",
            "users:page",
            "users:page:NaN",
            "unknown:page:0",
            "users:explode:1",
            "withdrawals:approve:abc",
            "withdrawals:select:1",
            "sessions:status:",
            "approve_12",
        ] {
            let err = CallbackKey::decode(raw).expect_err(raw);
            assert!(
                matches!(err, BotError::InvalidInput(_)),
                "expected InvalidInput for {raw}"
            );
        }
    }
}
