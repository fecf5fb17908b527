use std::sync::Arc;

use teloxide::prelude::*;

use ssb_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::types::{self, IncomingUpdate},
    texts,
};

use crate::router::AppState;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let data = q.data.clone().unwrap_or_default();

    // Button presses always originate from a message the bot sent; without it
    // (or without a payload) there is nothing to do beyond acknowledging.
    let Some(message) = q.message.as_ref() else {
        let _ = state.messenger.answer_callback(&q.id, None).await;
        return Ok(());
    };
    if data.is_empty() {
        let _ = state.messenger.answer_callback(&q.id, None).await;
        return Ok(());
    }

    let chat_id = ChatId(message.chat.id.0);
    let origin = MessageRef {
        chat_id,
        message_id: MessageId(message.id.0),
    };

    let _guard = state.chat_locks.lock_chat(chat_id.0).await;

    let result = state
        .controller
        .handle(IncomingUpdate::Callback(types::CallbackQuery {
            chat_id,
            user_id: UserId(q.from.id.0 as i64),
            username: q.from.username.clone(),
            callback_id: q.id.clone(),
            data,
            message: Some(origin),
        }))
        .await;

    match result {
        Ok(resp) => {
            if let Err(e) = state
                .messenger
                .answer_callback(&q.id, resp.alert.as_deref())
                .await
            {
                tracing::warn!("answer callback failed: {e}");
            }

            // Screens replace the pressed menu message in place.
            if let Some(body) = resp.text {
                if let Err(e) = state.messenger.edit_text(origin, &body, resp.keyboard).await {
                    tracing::warn!("edit failed: {e}");
                }
            }
        }
        Err(e) => {
            tracing::error!("session handling failed: {e}");
            let _ = state.messenger.answer_callback(&q.id, None).await;
            if let Err(e) = state.messenger.send_text(chat_id, texts::ERROR, None).await {
                tracing::warn!("send failed: {e}");
            }
        }
    }

    Ok(())
}
