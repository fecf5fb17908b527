use std::sync::Arc;

use teloxide::prelude::*;

use ssb_core::{
    domain::{ChatId, UserId},
    messaging::types::{IncomingUpdate, TextMessage},
};

use crate::handlers::deliver_to_chat;
use crate::router::AppState;

pub async fn handle_text(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(body) = msg.text() else {
        return Ok(());
    };
    if body.trim().is_empty() {
        return Ok(());
    }

    let chat_id = ChatId(msg.chat.id.0);
    let result = state
        .controller
        .handle(IncomingUpdate::Text(TextMessage {
            chat_id,
            user_id: UserId(user.id.0 as i64),
            username: user.username.clone(),
            text: body.to_string(),
        }))
        .await;

    deliver_to_chat(&state, chat_id, result).await;
    Ok(())
}
