//! Dialog flows through the conversation engine with a scripted login
//! provider and a recording notifier.

use async_trait::async_trait;
use chrono::Utc;
use loyalty_bot::admin::AdminActionRouter;
use loyalty_bot::config::{Settings, POINTS_PER_DAILY_LOGIN, POINTS_PER_LOGIN};
use loyalty_bot::engine::{ConversationEngine, DialogState};
use loyalty_bot::error::{BotError, BotResult};
use loyalty_bot::notify::Notifier;
use loyalty_bot::provider::{InitiateOutcome, LoginProvider, LoginStatus};
use loyalty_bot::registry::SessionRegistry;
use loyalty_bot::reply::labels;
use loyalty_bot::store::Store;
use loyalty_bot::withdraw::WithdrawalWorkflow;
use std::sync::{Arc, Mutex};

const ADMIN: i64 = 1;
const USER: i64 = 100;
const PHONE: &str = "+8801712345678";

/// Scripted provider: tests flip the fields to steer the flow.
struct MockProvider {
    /// `None` simulates an unreachable provider.
    initiate: Mutex<Option<InitiateOutcome>>,
    status: Mutex<LoginStatus>,
    /// `None` simulates an unreachable provider during logout.
    terminate: Mutex<Option<bool>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            initiate: Mutex::new(Some(InitiateOutcome::QrIssued(
                "http://provider.local/qr/1.png".to_string(),
            ))),
            status: Mutex::new(LoginStatus::Pending),
            terminate: Mutex::new(Some(true)),
        }
    }
}

impl MockProvider {
    fn set_status(&self, status: LoginStatus) {
        *self.status.lock().expect("status lock") = status;
    }

    fn set_initiate(&self, outcome: Option<InitiateOutcome>) {
        *self.initiate.lock().expect("initiate lock") = outcome;
    }

    fn set_terminate(&self, outcome: Option<bool>) {
        *self.terminate.lock().expect("terminate lock") = outcome;
    }
}

#[async_trait]
impl LoginProvider for MockProvider {
    async fn initiate(&self, _phone: &str) -> BotResult<InitiateOutcome> {
        self.initiate
            .lock()
            .expect("initiate lock")
            .clone()
            .ok_or_else(|| BotError::ProviderUnavailable("connection refused".to_string()))
    }

    async fn status(&self, _phone: &str) -> BotResult<LoginStatus> {
        Ok(*self.status.lock().expect("status lock"))
    }

    async fn terminate(&self, _phone: &str) -> BotResult<bool> {
        let scripted = *self.terminate.lock().expect("terminate lock");
        scripted.ok_or_else(|| BotError::ProviderUnavailable("connection refused".to_string()))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(i64, String)>>,
    /// Recipients whose deliveries fail instead of being recorded.
    unreachable: Mutex<Vec<i64>>,
}

impl RecordingNotifier {
    fn messages_for(&self, user_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .expect("notifier lock")
            .iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn make_unreachable(&self, user_id: i64) {
        self.unreachable
            .lock()
            .expect("unreachable lock")
            .push(user_id);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: i64, text: &str) -> BotResult<()> {
        if self
            .unreachable
            .lock()
            .expect("unreachable lock")
            .contains(&user_id)
        {
            return Err(BotError::NotificationFailure(format!(
                "user {user_id} blocked the bot"
            )));
        }
        self.sent
            .lock()
            .expect("notifier lock")
            .push((user_id, text.to_string()));
        Ok(())
    }
}

struct Harness {
    store: Arc<Store>,
    provider: Arc<MockProvider>,
    notifier: Arc<RecordingNotifier>,
    engine: ConversationEngine,
}

fn test_settings(login_confirm_timeout_secs: i64) -> Arc<Settings> {
    Arc::new(Settings {
        telegram_token: "TEST".to_string(),
        super_admin_id: ADMIN,
        admin_ids_str: None,
        provider_base_url: "http://localhost:3000".to_string(),
        database_url: "sqlite::memory:".to_string(),
        points_per_unit: 10,
        min_withdrawal: 100.0,
        page_size: 5,
        login_confirm_timeout_secs,
    })
}

async fn harness_with_timeout(login_confirm_timeout_secs: i64) -> Harness {
    let store = Arc::new(Store::in_memory().await.expect("in-memory store"));
    let provider = Arc::new(MockProvider::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let settings = test_settings(login_confirm_timeout_secs);

    let registry = Arc::new(SessionRegistry::new(store.clone(), provider.clone()));
    let withdrawals = Arc::new(WithdrawalWorkflow::new(
        store.clone(),
        notifier.clone(),
        settings.points_per_unit,
        settings.min_withdrawal,
    ));
    let router = AdminActionRouter::new(
        store.clone(),
        registry.clone(),
        withdrawals.clone(),
        settings.page_size,
    );
    let engine = ConversationEngine::new(
        store.clone(),
        registry,
        withdrawals,
        router,
        notifier.clone(),
        settings,
    );

    Harness {
        store,
        provider,
        notifier,
        engine,
    }
}

async fn harness() -> Harness {
    harness_with_timeout(300).await
}

#[tokio::test]
async fn start_registers_and_pays_the_bonus_once_per_day() {
    let h = harness().await;

    let replies = h.engine.handle_start(USER, "alice").await.expect("start");
    assert!(replies.iter().any(|r| r.markup.is_some()));
    assert_eq!(
        h.store.balance(USER).await.expect("balance"),
        POINTS_PER_DAILY_LOGIN
    );

    // Same UTC day: no second bonus.
    h.engine.handle_start(USER, "alice").await.expect("start");
    assert_eq!(
        h.store.balance(USER).await.expect("balance"),
        POINTS_PER_DAILY_LOGIN
    );
}

#[tokio::test]
async fn login_flow_rewards_on_confirmation() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");

    h.engine
        .handle_text(USER, "alice", labels::LOGIN)
        .await
        .expect("menu");
    assert_eq!(
        h.engine.dialog_state(USER).await,
        DialogState::AwaitingPhoneNumber
    );

    let replies = h
        .engine
        .handle_text(USER, "alice", PHONE)
        .await
        .expect("phone");
    assert!(replies.iter().any(|r| r.photo_url.is_some()));
    assert!(matches!(
        h.engine.dialog_state(USER).await,
        DialogState::AwaitingLoginConfirmation { .. }
    ));

    // Not scanned yet: the dialog stays open.
    h.engine.handle_confirm(USER).await.expect("confirm");
    assert!(matches!(
        h.engine.dialog_state(USER).await,
        DialogState::AwaitingLoginConfirmation { .. }
    ));

    h.provider.set_status(LoginStatus::Authenticated);
    let replies = h.engine.handle_confirm(USER).await.expect("confirm");
    assert!(replies[0].text.contains("logged in"));
    assert_eq!(h.engine.dialog_state(USER).await, DialogState::Idle);
    assert_eq!(
        h.store.balance(USER).await.expect("balance"),
        POINTS_PER_DAILY_LOGIN + POINTS_PER_LOGIN
    );
    assert_eq!(
        h.store.active_session_count(USER).await.expect("count"),
        1
    );
    let user = h
        .store
        .get_user(USER)
        .await
        .expect("get user")
        .expect("registered");
    assert_eq!(user.successful_logins, 1);
}

#[tokio::test]
async fn malformed_phone_keeps_prompting() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine
        .handle_text(USER, "alice", labels::LOGIN)
        .await
        .expect("menu");

    h.engine
        .handle_text(USER, "alice", "hello")
        .await
        .expect("bad phone");
    assert_eq!(
        h.engine.dialog_state(USER).await,
        DialogState::AwaitingPhoneNumber
    );
}

#[tokio::test]
async fn expired_qr_counts_as_a_failed_login() {
    let h = harness_with_timeout(-1).await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine
        .handle_text(USER, "alice", labels::LOGIN)
        .await
        .expect("menu");
    h.engine
        .handle_text(USER, "alice", PHONE)
        .await
        .expect("phone");

    let replies = h.engine.handle_confirm(USER).await.expect("confirm");
    assert!(replies[0].text.contains("expired"));
    assert_eq!(h.engine.dialog_state(USER).await, DialogState::Idle);
    let user = h
        .store
        .get_user(USER)
        .await
        .expect("get user")
        .expect("registered");
    assert_eq!(user.failed_logins, 1);
    assert_eq!(user.successful_logins, 0);
}

#[tokio::test]
async fn unreachable_provider_aborts_the_login_dialog() {
    let h = harness().await;
    h.provider.set_initiate(None);
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine
        .handle_text(USER, "alice", labels::LOGIN)
        .await
        .expect("menu");

    let replies = h
        .engine
        .handle_text(USER, "alice", PHONE)
        .await
        .expect("phone");
    assert!(replies.iter().any(|r| r.text.contains("Could not start")));
    assert_eq!(h.engine.dialog_state(USER).await, DialogState::Idle);
}

#[tokio::test]
async fn already_linked_number_ends_the_dialog_without_reward() {
    let h = harness().await;
    h.provider
        .set_initiate(Some(InitiateOutcome::AlreadyAuthenticated));
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine
        .handle_text(USER, "alice", labels::LOGIN)
        .await
        .expect("menu");

    let replies = h
        .engine
        .handle_text(USER, "alice", PHONE)
        .await
        .expect("phone");
    assert!(replies.iter().any(|r| r.text.contains("already linked")));
    assert_eq!(h.engine.dialog_state(USER).await, DialogState::Idle);
    assert_eq!(h.store.active_session_count(USER).await.expect("count"), 0);
    assert_eq!(
        h.store.balance(USER).await.expect("balance"),
        POINTS_PER_DAILY_LOGIN
    );
}

#[tokio::test]
async fn conflicting_login_ends_the_dialog() {
    let h = harness().await;
    h.provider.set_initiate(Some(InitiateOutcome::Conflict));
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine
        .handle_text(USER, "alice", labels::LOGIN)
        .await
        .expect("menu");

    let replies = h
        .engine
        .handle_text(USER, "alice", PHONE)
        .await
        .expect("phone");
    assert!(replies.iter().any(|r| r.text.contains("already in progress")));
    assert_eq!(h.engine.dialog_state(USER).await, DialogState::Idle);
    assert_eq!(h.store.active_session_count(USER).await.expect("count"), 0);
}

#[tokio::test]
async fn menu_label_overrides_an_open_dialog() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine
        .handle_text(USER, "alice", labels::WITHDRAW)
        .await
        .expect("menu");
    assert_eq!(
        h.engine.dialog_state(USER).await,
        DialogState::AwaitingWithdrawAmount
    );

    let replies = h
        .engine
        .handle_text(USER, "alice", labels::ACCOUNT)
        .await
        .expect("account");
    assert!(replies.iter().any(|r| r.text.contains("Points balance")));
    assert_eq!(h.engine.dialog_state(USER).await, DialogState::Idle);
}

#[tokio::test]
async fn cancel_resets_the_dialog_without_side_effects() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine
        .handle_text(USER, "alice", labels::LOGIN)
        .await
        .expect("menu");

    let replies = h.engine.handle_cancel(USER).await.expect("cancel");
    assert!(replies[0].text.contains("cancelled"));
    assert_eq!(h.engine.dialog_state(USER).await, DialogState::Idle);

    let replies = h.engine.handle_cancel(USER).await.expect("cancel again");
    assert!(replies[0].text.contains("Nothing to cancel"));
}

#[tokio::test]
async fn withdrawal_dialog_creates_a_request_and_alerts_admins() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.store.credit(USER, 1995, "seed").await.expect("seed");

    h.engine
        .handle_text(USER, "alice", labels::WITHDRAW)
        .await
        .expect("menu");

    // Non-numeric input re-prompts in place.
    h.engine
        .handle_text(USER, "alice", "abc")
        .await
        .expect("bad amount");
    assert_eq!(
        h.engine.dialog_state(USER).await,
        DialogState::AwaitingWithdrawAmount
    );

    h.engine
        .handle_text(USER, "alice", "100")
        .await
        .expect("amount");
    assert!(matches!(
        h.engine.dialog_state(USER).await,
        DialogState::AwaitingWithdrawNumber { points: 1000, .. }
    ));

    let replies = h
        .engine
        .handle_text(USER, "alice", "01712345678")
        .await
        .expect("number");
    assert!(replies.iter().any(|r| r.text.contains("received")));
    assert_eq!(h.engine.dialog_state(USER).await, DialogState::Idle);
    assert_eq!(h.store.balance(USER).await.expect("balance"), 1000);
    assert_eq!(
        h.store.pending_withdrawals().await.expect("pending").len(),
        1
    );
    assert!(h.notifier.messages_for(ADMIN)[0].contains("withdrawal request"));
}

#[tokio::test]
async fn broadcast_is_super_admin_only_and_reports_counts() {
    let h = harness().await;
    h.engine.handle_start(ADMIN, "boss").await.expect("start");
    h.engine.handle_start(USER, "alice").await.expect("start");

    // Ordinary users never reach the broadcast dialog.
    h.engine
        .handle_text(USER, "alice", labels::ADMIN_BROADCAST)
        .await
        .expect("denied");
    assert_eq!(h.engine.dialog_state(USER).await, DialogState::Idle);

    h.engine
        .handle_text(ADMIN, "boss", labels::ADMIN_BROADCAST)
        .await
        .expect("menu");
    assert_eq!(
        h.engine.dialog_state(ADMIN).await,
        DialogState::AwaitingBroadcastText
    );

    let replies = h
        .engine
        .handle_text(ADMIN, "boss", "hello everyone")
        .await
        .expect("broadcast");
    assert!(replies.iter().any(|r| r.text.contains("Delivered: 2")));
    assert_eq!(h.engine.dialog_state(ADMIN).await, DialogState::Idle);
    assert_eq!(h.notifier.messages_for(USER), vec!["hello everyone"]);
}

#[tokio::test]
async fn callbacks_are_gated_and_strictly_decoded() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine.handle_start(ADMIN, "boss").await.expect("start");

    let replies = h
        .engine
        .handle_callback(USER, "users:page:0")
        .await
        .expect("non-admin");
    assert!(replies[0].text.contains("Admins only"));

    let replies = h
        .engine
        .handle_callback(ADMIN, "garbage")
        .await
        .expect("malformed");
    assert!(replies[0].text.contains("Unrecognized"));

    let replies = h
        .engine
        .handle_callback(ADMIN, "users:page:0")
        .await
        .expect("listing");
    assert!(replies[0].markup.is_some());
}

#[tokio::test]
async fn withdrawal_review_via_callbacks_is_idempotent() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.store.credit(USER, 1995, "seed").await.expect("seed");
    let withdrawal = h
        .store
        .create_withdrawal(USER, 100.0, 1000, "01712345678", Utc::now())
        .await
        .expect("request");

    let key = format!("withdrawals:approve:{}", withdrawal.request_id);
    let replies = h.engine.handle_callback(ADMIN, &key).await.expect("approve");
    assert!(replies[0].text.contains("approved"));

    let replies = h
        .engine
        .handle_callback(ADMIN, &key)
        .await
        .expect("approve again");
    assert!(replies[0].text.contains("already processed"));
    assert_eq!(h.store.balance(USER).await.expect("balance"), 1000);
}

#[tokio::test]
async fn session_action_menu_drives_the_admin_dialog() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine.handle_start(ADMIN, "boss").await.expect("start");
    h.store
        .record_confirmed_login(USER, PHONE, POINTS_PER_LOGIN, Utc::now())
        .await
        .expect("link session");

    let replies = h
        .engine
        .handle_callback(ADMIN, &format!("sessions:select:{PHONE}"))
        .await
        .expect("select");
    assert!(replies[0].markup.is_some());
    assert_eq!(
        h.engine.dialog_state(ADMIN).await,
        DialogState::AwaitingAdminSessionChoice {
            phone: PHONE.to_string()
        }
    );

    let replies = h
        .engine
        .handle_callback(ADMIN, "sessions:cancel:-")
        .await
        .expect("cancel");
    assert!(replies[0].text.contains("cancelled"));
    assert_eq!(h.engine.dialog_state(ADMIN).await, DialogState::Idle);
}

#[tokio::test]
async fn session_logout_marks_the_row_inactive() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine.handle_start(ADMIN, "boss").await.expect("start");
    h.store
        .record_confirmed_login(USER, PHONE, POINTS_PER_LOGIN, Utc::now())
        .await
        .expect("link session");

    let replies = h
        .engine
        .handle_callback(ADMIN, &format!("sessions:logout:{PHONE}"))
        .await
        .expect("logout");
    assert!(replies[0].text.contains("logged out"));
    assert_eq!(
        h.store.active_session_count(USER).await.expect("count"),
        0
    );
}

#[tokio::test]
async fn refused_logout_leaves_the_session_active() {
    let h = harness().await;
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine.handle_start(ADMIN, "boss").await.expect("start");
    h.store
        .record_confirmed_login(USER, PHONE, POINTS_PER_LOGIN, Utc::now())
        .await
        .expect("link session");

    // The provider answers but refuses the revocation.
    h.provider.set_terminate(Some(false));
    let replies = h
        .engine
        .handle_callback(ADMIN, &format!("sessions:logout:{PHONE}"))
        .await
        .expect("refused logout");
    assert!(replies[0].text.contains("refused"));
    assert_eq!(h.store.active_session_count(USER).await.expect("count"), 1);

    // The provider is unreachable outright.
    h.provider.set_terminate(None);
    let replies = h
        .engine
        .handle_callback(ADMIN, &format!("sessions:logout:{PHONE}"))
        .await
        .expect("unreachable logout");
    assert!(replies[0].text.contains("Logout failed"));
    assert_eq!(h.store.active_session_count(USER).await.expect("count"), 1);
}

#[tokio::test]
async fn broadcast_failures_do_not_block_other_recipients() {
    let h = harness().await;
    h.engine.handle_start(ADMIN, "boss").await.expect("start");
    h.engine.handle_start(USER, "alice").await.expect("start");
    h.engine.handle_start(101, "carol").await.expect("start");
    h.notifier.make_unreachable(USER);

    h.engine
        .handle_text(ADMIN, "boss", labels::ADMIN_BROADCAST)
        .await
        .expect("menu");
    let replies = h
        .engine
        .handle_text(ADMIN, "boss", "maintenance tonight")
        .await
        .expect("broadcast");

    assert!(replies.iter().any(|r| r.text.contains("Delivered: 2")));
    assert!(replies.iter().any(|r| r.text.contains("Failed: 1")));
    assert_eq!(h.engine.dialog_state(ADMIN).await, DialogState::Idle);
    assert_eq!(h.notifier.messages_for(101), vec!["maintenance tonight"]);
    assert!(h.notifier.messages_for(USER).is_empty());
}
