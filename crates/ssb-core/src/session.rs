//! Per-user conversation engine.
//!
//! The controller resolves incoming commands, button presses and free-text
//! messages into menu screens, subscription prompts and AI answers. Each user
//! sits in one of two states: `Idle` or `AwaitingQuestion` (the next free-text
//! message goes to the completion service). State is in-memory only; losing it
//! resets conversation context, never quota or subscription data.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::{
    config::Config,
    domain::{Role, UserId},
    menu::{self, MenuRegistry},
    messaging::types::{
        CallbackQuery, Command, IncomingUpdate, InlineButton, InlineKeyboard, TextMessage,
    },
    ports::{CompletionClient, MembershipPort, MembershipStatus},
    store::UserStore,
    texts, Result,
};

/// Conversation state of a single user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConvState {
    #[default]
    Idle,
    AwaitingQuestion,
}

/// Outbound directive: what the transport layer should show the user.
///
/// `text`/`keyboard` become a sent or edited message (the handler decides
/// which); `alert` becomes an ephemeral callback acknowledgement.
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub text: Option<String>,
    pub keyboard: Option<InlineKeyboard>,
    pub alert: Option<String>,
}

impl Response {
    pub fn screen(text: impl Into<String>, keyboard: InlineKeyboard) -> Self {
        Self {
            text: Some(text.into()),
            keyboard: Some(keyboard),
            alert: None,
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            keyboard: None,
            alert: None,
        }
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Self {
            text: None,
            keyboard: None,
            alert: Some(text.into()),
        }
    }
}

/// The orchestrator: consults the store, the gate and the menu registry,
/// advances per-user state, and emits an outbound directive.
///
/// Gate and completion failures are converted to user notices here; store
/// failures propagate so the handler can report the request as failed.
pub struct SessionController {
    cfg: Arc<Config>,
    store: Arc<UserStore>,
    menus: Arc<MenuRegistry>,
    gate: Arc<dyn MembershipPort>,
    ai: Arc<dyn CompletionClient>,
    states: Mutex<HashMap<UserId, ConvState>>,
}

impl SessionController {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<UserStore>,
        menus: Arc<MenuRegistry>,
        gate: Arc<dyn MembershipPort>,
        ai: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            cfg,
            store,
            menus,
            gate,
            ai,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle(&self, update: IncomingUpdate) -> Result<Response> {
        match update {
            IncomingUpdate::Command(cmd) => self.handle_command(cmd).await,
            IncomingUpdate::Callback(cb) => self.handle_callback(cb).await,
            IncomingUpdate::Text(msg) => self.handle_text(msg).await,
        }
    }

    pub async fn state_of(&self, user_id: UserId) -> ConvState {
        self.states
            .lock()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or_default()
    }

    async fn set_state(&self, user_id: UserId, state: ConvState) {
        self.states.lock().await.insert(user_id, state);
    }

    async fn handle_command(&self, cmd: Command) -> Result<Response> {
        self.store.get_or_create(cmd.user_id).await?;

        match cmd.name.as_str() {
            "start" => {
                self.set_state(cmd.user_id, ConvState::Idle).await;
                Ok(match self.menus.resolve(menu::MAIN_MENU) {
                    Ok(node) => Response::screen(texts::WELCOME, node.keyboard),
                    Err(e) => {
                        tracing::warn!("main menu lookup failed: {e}");
                        Response::notice(texts::ERROR)
                    }
                })
            }
            "menu" => {
                self.set_state(cmd.user_id, ConvState::Idle).await;
                Ok(self.menu_screen(menu::MAIN_MENU))
            }
            "stats" => {
                if self.cfg.role_for(cmd.user_id) != Role::Admin {
                    return Ok(Response::notice(texts::ADMIN_ONLY));
                }
                Ok(match self.store.stats().await {
                    Ok((total, subscribed)) => Response::notice(texts::stats(total, subscribed)),
                    Err(e) => {
                        tracing::error!("stats query failed: {e}");
                        Response::notice(texts::admin_error(&e.to_string()))
                    }
                })
            }
            "reload" => {
                if self.cfg.role_for(cmd.user_id) != Role::Admin {
                    return Ok(Response::notice(texts::ADMIN_ONLY));
                }
                Ok(match self.menus.reload() {
                    Ok(screens) => Response::notice(texts::reload_ok(screens)),
                    Err(e) => {
                        tracing::warn!("menu reload failed: {e}");
                        Response::notice(texts::reload_failed(&e.to_string()))
                    }
                })
            }
            _ => Ok(Response::notice(texts::UNKNOWN_INPUT)),
        }
    }

    async fn handle_callback(&self, cb: CallbackQuery) -> Result<Response> {
        self.store.get_or_create(cb.user_id).await?;

        match cb.data.as_str() {
            menu::ACTION_ASK_NEURO => self.start_question(cb.user_id).await,
            menu::ACTION_CHECK_SUBSCRIPTION => self.confirm_subscription(cb.user_id).await,
            name => match self.menus.resolve(name) {
                Ok(node) => {
                    // Navigation cancels any pending question prompt.
                    self.set_state(cb.user_id, ConvState::Idle).await;
                    Ok(Response::screen(node.text, node.keyboard))
                }
                Err(e) => {
                    tracing::warn!(user_id = cb.user_id.0, "unknown callback target: {e}");
                    Ok(Response::notice(texts::ERROR))
                }
            },
        }
    }

    async fn handle_text(&self, msg: TextMessage) -> Result<Response> {
        self.store.get_or_create(msg.user_id).await?;

        if self.state_of(msg.user_id).await != ConvState::AwaitingQuestion {
            return Ok(Response::notice(texts::UNKNOWN_INPUT));
        }

        // Back to Idle before the upstream call: whatever the outcome, the
        // session must not stay stuck awaiting a question.
        self.set_state(msg.user_id, ConvState::Idle).await;
        self.answer_question(msg.user_id, &msg.text).await
    }

    /// "Ask AI" button: run the gate (admins skip it), then the quota check,
    /// then prompt for the question.
    async fn start_question(&self, user_id: UserId) -> Result<Response> {
        let role = self.cfg.role_for(user_id);

        if role != Role::Admin {
            match self.gate.check_membership(user_id).await {
                MembershipStatus::Subscribed => {
                    let user = self.store.get_or_create(user_id).await?;
                    if !user.subscribed {
                        self.store.set_subscribed(user_id, true).await?;
                    }
                }
                MembershipStatus::NotSubscribed => {
                    return Ok(Response::screen(
                        texts::SUBSCRIBE_REQUIRED,
                        subscribe_keyboard(&self.cfg),
                    ));
                }
                MembershipStatus::Unknown => {
                    return Ok(Response::notice(texts::GATE_UNAVAILABLE));
                }
            }

            let count = self.store.question_count(user_id).await?;
            if count >= self.cfg.max_questions {
                return Ok(Response::notice(texts::quota_exceeded(
                    self.cfg.max_questions,
                )));
            }
        }

        self.set_state(user_id, ConvState::AwaitingQuestion).await;
        Ok(Response::notice(texts::ASK_PROMPT))
    }

    /// "I subscribed" button: re-run the gate and either open the main menu
    /// or answer with an ephemeral alert.
    async fn confirm_subscription(&self, user_id: UserId) -> Result<Response> {
        match self.gate.check_membership(user_id).await {
            MembershipStatus::Subscribed => {
                self.store.set_subscribed(user_id, true).await?;
                self.set_state(user_id, ConvState::Idle).await;
                Ok(match self.menus.resolve(menu::MAIN_MENU) {
                    Ok(node) => Response::screen(texts::WELCOME, node.keyboard),
                    Err(e) => {
                        tracing::warn!("main menu lookup failed: {e}");
                        Response::notice(texts::ERROR)
                    }
                })
            }
            MembershipStatus::NotSubscribed => Ok(Response::alert(texts::NOT_SUBSCRIBED_ALERT)),
            MembershipStatus::Unknown => Ok(Response::alert(texts::GATE_UNAVAILABLE)),
        }
    }

    async fn answer_question(&self, user_id: UserId, question: &str) -> Result<Response> {
        let role = self.cfg.role_for(user_id);
        let budget = self.cfg.token_budget(role);

        match self.ai.ask(question, budget).await {
            Ok(answer) => {
                // Admin questions are never metered.
                if role != Role::Admin {
                    self.store.increment_question_count(user_id).await?;
                }
                Ok(Response::notice(answer))
            }
            Err(e) => {
                tracing::warn!(user_id = user_id.0, "completion failed: {e}");
                Ok(Response::notice(texts::AI_UNAVAILABLE))
            }
        }
    }

    fn menu_screen(&self, name: &str) -> Response {
        match self.menus.resolve(name) {
            Ok(node) => Response::screen(node.text, node.keyboard),
            Err(e) => {
                tracing::warn!("menu lookup failed: {e}");
                Response::notice(texts::ERROR)
            }
        }
    }
}

/// Subscribe prompt keyboard: channel link plus the re-check button.
fn subscribe_keyboard(cfg: &Config) -> InlineKeyboard {
    InlineKeyboard::new(vec![
        vec![InlineButton::url(
            texts::BTN_SUBSCRIBE,
            format!("https://t.me/{}", cfg.channel_handle()),
        )],
        vec![InlineButton::callback(
            texts::BTN_CONFIRM_SUBSCRIPTION,
            menu::ACTION_CHECK_SUBSCRIPTION,
        )],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatId;
    use crate::errors::Error;
    use crate::messaging::types::ButtonAction;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FakeGate(std::sync::Mutex<MembershipStatus>);

    impl FakeGate {
        fn set(&self, status: MembershipStatus) {
            *self.0.lock().unwrap() = status;
        }
    }

    #[async_trait]
    impl MembershipPort for FakeGate {
        async fn check_membership(&self, _user_id: UserId) -> MembershipStatus {
            *self.0.lock().unwrap()
        }
    }

    struct FakeAi {
        reply: String,
        fail: AtomicBool,
        budgets: std::sync::Mutex<Vec<u32>>,
    }

    impl FakeAi {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                fail: AtomicBool::new(false),
                budgets: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for FakeAi {
        async fn ask(&self, _question: &str, max_tokens: u32) -> Result<String> {
            self.budgets.lock().unwrap().push(max_tokens);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Upstream("completion timed out".to_string()));
            }
            Ok(self.reply.clone())
        }
    }

    const MENUS: &str = r#"{
      "menus": [
        {
          "name": "main_menu",
          "text": "🏠 Главное меню:",
          "rows": [
            [{"label": "💳 Кредитные карты", "menu": "credit_cards"}],
            [{"label": "🤖 Спросить нейросеть", "action": "ask_neuro"}]
          ]
        },
        {
          "name": "credit_cards",
          "text": "💳 Кредитные карты:",
          "rows": [[{"label": "🔙 Назад", "menu": "main_menu"}]]
        }
      ]
    }"#;

    const ADMIN: UserId = UserId(7);

    struct Harness {
        controller: SessionController,
        store: Arc<UserStore>,
        gate: Arc<FakeGate>,
        ai: Arc<FakeAi>,
    }

    fn tmp(prefix: &str, ext: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.{ext}"))
    }

    fn harness(prefix: &str) -> Harness {
        let cfg = Arc::new(Config {
            bot_token: "x".to_string(),
            channel: "@sozvezdie_skidok".to_string(),
            admin_ids: vec![ADMIN.0],
            db_path: tmp(prefix, "db"),
            menus_path: tmp(prefix, "json"),
            health_port: 5000,
            ai_endpoint: "http://localhost/v1/chat/completions".to_string(),
            ai_api_key: None,
            ai_model: "gpt-4o-mini".to_string(),
            ai_timeout: Duration::from_secs(1),
            max_questions: 5,
            user_token_budget: 512,
            admin_token_budget: 2048,
        });

        std::fs::write(&cfg.menus_path, MENUS).unwrap();
        let vars = HashMap::from([("channel".to_string(), cfg.channel_handle().to_string())]);

        let store = Arc::new(UserStore::open(&cfg.db_path).unwrap());
        let menus = Arc::new(MenuRegistry::load(cfg.menus_path.clone(), vars).unwrap());
        let gate = Arc::new(FakeGate(std::sync::Mutex::new(
            MembershipStatus::NotSubscribed,
        )));
        let ai = Arc::new(FakeAi::new("Годовая процентная ставка."));

        Harness {
            controller: SessionController::new(
                cfg,
                store.clone(),
                menus,
                gate.clone(),
                ai.clone(),
            ),
            store,
            gate,
            ai,
        }
    }

    fn cmd(user_id: UserId, name: &str) -> IncomingUpdate {
        IncomingUpdate::Command(Command {
            chat_id: ChatId(user_id.0),
            user_id,
            username: None,
            name: name.to_string(),
            args: String::new(),
        })
    }

    fn cb(user_id: UserId, data: &str) -> IncomingUpdate {
        IncomingUpdate::Callback(CallbackQuery {
            chat_id: ChatId(user_id.0),
            user_id,
            username: None,
            callback_id: "cb1".to_string(),
            data: data.to_string(),
            message: None,
        })
    }

    fn txt(user_id: UserId, text: &str) -> IncomingUpdate {
        IncomingUpdate::Text(TextMessage {
            chat_id: ChatId(user_id.0),
            user_id,
            username: None,
            text: text.to_string(),
        })
    }

    #[tokio::test]
    async fn start_shows_welcome_with_main_menu_keyboard() {
        let h = harness("ssb-fsm-start");
        let resp = h.controller.handle(cmd(UserId(42), "start")).await.unwrap();

        assert_eq!(resp.text.as_deref(), Some(texts::WELCOME));
        assert!(resp.keyboard.is_some());
        assert_eq!(h.controller.state_of(UserId(42)).await, ConvState::Idle);
    }

    #[tokio::test]
    async fn navigation_resolves_menu_and_unknown_target_is_a_notice() {
        let h = harness("ssb-fsm-nav");
        let resp = h
            .controller
            .handle(cb(UserId(42), "credit_cards"))
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some("💳 Кредитные карты:"));

        let resp = h.controller.handle(cb(UserId(42), "garage")).await.unwrap();
        assert_eq!(resp.text.as_deref(), Some(texts::ERROR));
        assert_eq!(h.controller.state_of(UserId(42)).await, ConvState::Idle);
    }

    #[tokio::test]
    async fn gate_and_quota_scenario_for_regular_user() {
        let h = harness("ssb-fsm-scenario");
        let user = UserId(42);

        h.controller.handle(cmd(user, "start")).await.unwrap();

        // Not subscribed: subscribe prompt, still Idle.
        let resp = h
            .controller
            .handle(cb(user, menu::ACTION_ASK_NEURO))
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some(texts::SUBSCRIBE_REQUIRED));
        let kb = resp.keyboard.unwrap();
        assert!(matches!(kb.rows[0][0].action, ButtonAction::Url(ref u)
            if u == "https://t.me/sozvezdie_skidok"));
        assert_eq!(h.controller.state_of(user).await, ConvState::Idle);

        // Subscribed now: prompt for the question.
        h.gate.set(MembershipStatus::Subscribed);
        let resp = h
            .controller
            .handle(cb(user, menu::ACTION_ASK_NEURO))
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some(texts::ASK_PROMPT));
        assert_eq!(
            h.controller.state_of(user).await,
            ConvState::AwaitingQuestion
        );
        assert!(h.store.get_or_create(user).await.unwrap().subscribed);

        // The question goes upstream; quota is consumed; back to Idle.
        let resp = h
            .controller
            .handle(txt(user, "Что такое APR?"))
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some("Годовая процентная ставка."));
        assert_eq!(h.store.question_count(user).await.unwrap(), 1);
        assert_eq!(h.controller.state_of(user).await, ConvState::Idle);
        assert_eq!(*h.ai.budgets.lock().unwrap(), vec![512]);
    }

    #[tokio::test]
    async fn unknown_membership_is_treated_as_denial() {
        let h = harness("ssb-fsm-unknown");
        h.gate.set(MembershipStatus::Unknown);

        let resp = h
            .controller
            .handle(cb(UserId(42), menu::ACTION_ASK_NEURO))
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some(texts::GATE_UNAVAILABLE));
        assert_eq!(h.controller.state_of(UserId(42)).await, ConvState::Idle);
    }

    #[tokio::test]
    async fn sixth_question_is_rejected_and_counter_stays_at_five() {
        let h = harness("ssb-fsm-quota");
        let user = UserId(42);
        h.gate.set(MembershipStatus::Subscribed);

        for _ in 0..5 {
            let resp = h
                .controller
                .handle(cb(user, menu::ACTION_ASK_NEURO))
                .await
                .unwrap();
            assert_eq!(resp.text.as_deref(), Some(texts::ASK_PROMPT));
            h.controller.handle(txt(user, "вопрос")).await.unwrap();
        }
        assert_eq!(h.store.question_count(user).await.unwrap(), 5);

        let resp = h
            .controller
            .handle(cb(user, menu::ACTION_ASK_NEURO))
            .await
            .unwrap();
        assert_eq!(resp.text, Some(texts::quota_exceeded(5)));
        assert_eq!(h.store.question_count(user).await.unwrap(), 5);
        assert_eq!(h.controller.state_of(user).await, ConvState::Idle);
    }

    #[tokio::test]
    async fn admin_skips_gate_and_is_never_metered() {
        let h = harness("ssb-fsm-admin");
        h.gate.set(MembershipStatus::NotSubscribed);

        for _ in 0..7 {
            let resp = h
                .controller
                .handle(cb(ADMIN, menu::ACTION_ASK_NEURO))
                .await
                .unwrap();
            assert_eq!(resp.text.as_deref(), Some(texts::ASK_PROMPT));
            h.controller.handle(txt(ADMIN, "вопрос")).await.unwrap();
        }

        assert_eq!(h.store.question_count(ADMIN).await.unwrap(), 0);
        assert_eq!(*h.ai.budgets.lock().unwrap(), vec![2048; 7]);
    }

    #[tokio::test]
    async fn upstream_failure_spares_quota_and_returns_to_idle() {
        let h = harness("ssb-fsm-upstream");
        let user = UserId(42);
        h.gate.set(MembershipStatus::Subscribed);

        h.controller
            .handle(cb(user, menu::ACTION_ASK_NEURO))
            .await
            .unwrap();
        h.ai.fail.store(true, Ordering::SeqCst);

        let resp = h
            .controller
            .handle(txt(user, "Что такое APR?"))
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some(texts::AI_UNAVAILABLE));
        assert_eq!(h.store.question_count(user).await.unwrap(), 0);
        assert_eq!(h.controller.state_of(user).await, ConvState::Idle);
    }

    #[tokio::test]
    async fn free_text_while_idle_is_not_understood() {
        let h = harness("ssb-fsm-idle-text");
        let resp = h
            .controller
            .handle(txt(UserId(42), "привет"))
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some(texts::UNKNOWN_INPUT));
        assert_eq!(h.controller.state_of(UserId(42)).await, ConvState::Idle);
    }

    #[tokio::test]
    async fn subscription_confirm_persists_flag_or_alerts() {
        let h = harness("ssb-fsm-confirm");
        let user = UserId(42);

        let resp = h
            .controller
            .handle(cb(user, menu::ACTION_CHECK_SUBSCRIPTION))
            .await
            .unwrap();
        assert_eq!(resp.alert.as_deref(), Some(texts::NOT_SUBSCRIBED_ALERT));
        assert!(resp.text.is_none());

        h.gate.set(MembershipStatus::Subscribed);
        let resp = h
            .controller
            .handle(cb(user, menu::ACTION_CHECK_SUBSCRIPTION))
            .await
            .unwrap();
        assert_eq!(resp.text.as_deref(), Some(texts::WELCOME));
        assert!(h.store.get_or_create(user).await.unwrap().subscribed);
    }

    #[tokio::test]
    async fn admin_commands_are_gated_by_role() {
        let h = harness("ssb-fsm-adm-cmd");

        let resp = h.controller.handle(cmd(UserId(42), "stats")).await.unwrap();
        assert_eq!(resp.text.as_deref(), Some(texts::ADMIN_ONLY));

        h.controller.handle(cmd(UserId(42), "start")).await.unwrap();
        let resp = h.controller.handle(cmd(ADMIN, "stats")).await.unwrap();
        assert_eq!(resp.text, Some(texts::stats(2, 0)));

        let resp = h.controller.handle(cmd(ADMIN, "reload")).await.unwrap();
        assert_eq!(resp.text, Some(texts::reload_ok(2)));
    }
}
