//! Telegram update handlers.
//!
//! Each handler maps the teloxide update into the core `IncomingUpdate`
//! model, runs it through the session controller under the per-chat lock,
//! and emits the resulting directive. Transport failures during emission are
//! logged and swallowed; they never corrupt session state.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use ssb_core::{domain::ChatId, session::Response, texts};

use crate::router::AppState;

mod callback;
mod commands;
mod text;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    callback::handle_callback(q, state).await
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;

    if let Some(body) = msg.text() {
        let _guard = state.chat_locks.lock_chat(chat_id).await;
        if body.starts_with('/') {
            return commands::handle_command(msg, state).await;
        }
        return text::handle_text(msg, state).await;
    }

    // Stickers, photos and the rest: not part of the conversation model.
    if let Err(e) = state
        .messenger
        .send_text(ChatId(chat_id), texts::UNKNOWN_INPUT, None)
        .await
    {
        tracing::warn!("send failed: {e}");
    }
    Ok(())
}

/// Send a controller result to a chat. A controller error (durable-store
/// failure) is reported to the user as a generic failure.
pub(crate) async fn deliver_to_chat(
    state: &AppState,
    chat_id: ChatId,
    result: ssb_core::Result<Response>,
) {
    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!("session handling failed: {e}");
            Response::notice(texts::ERROR)
        }
    };

    let Some(body) = resp.text else {
        return;
    };
    if let Err(e) = state
        .messenger
        .send_text(chat_id, &body, resp.keyboard)
        .await
    {
        tracing::warn!("send failed: {e}");
    }
}
