use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};

use ssb_core::{
    config::Config,
    menu::MenuRegistry,
    messaging::port::MessagingPort,
    ports::{CompletionClient, MembershipPort},
    session::SessionController,
    store::UserStore,
};

use crate::gate::TelegramMembershipGate;
use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub controller: Arc<SessionController>,
    pub messenger: Arc<dyn MessagingPort>,
    pub chat_locks: Arc<ChatLocks>,
}

/// Per-chat mutexes: Telegram delivers one update at a time per chat, but our
/// dispatcher is a pool, so a slow completion call could otherwise interleave
/// with a fast menu click from the same user.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(
    cfg: Arc<Config>,
    store: Arc<UserStore>,
    menus: Arc<MenuRegistry>,
    ai: Arc<dyn CompletionClient>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        tracing::info!("bot started: @{}", me.username());
    }
    tracing::info!("channel: {}", cfg.channel);
    tracing::info!("admins: {}", cfg.admin_ids.len());
    tracing::info!("menu screens: {}", menus.screen_count());

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let gate: Arc<dyn MembershipPort> =
        Arc::new(TelegramMembershipGate::new(bot.clone(), &cfg.channel));
    let controller = Arc::new(SessionController::new(
        cfg.clone(),
        store,
        menus,
        gate,
        ai,
    ));

    let state = Arc::new(AppState {
        cfg,
        controller,
        messenger,
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
