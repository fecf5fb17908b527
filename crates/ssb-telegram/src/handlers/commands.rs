use std::sync::Arc;

use teloxide::prelude::*;

use ssb_core::{
    domain::{ChatId, UserId},
    messaging::types::{Command, IncomingUpdate},
};

use crate::handlers::deliver_to_chat;
use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(body) = msg.text() else {
        return Ok(());
    };

    let (name, args) = parse_command(body);
    let chat_id = ChatId(msg.chat.id.0);

    let result = state
        .controller
        .handle(IncomingUpdate::Command(Command {
            chat_id,
            user_id: UserId(user.id.0 as i64),
            username: user.username.clone(),
            name,
            args,
        }))
        .await;

    deliver_to_chat(&state, chat_id, result).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_slash_bot_suffix_and_splits_args() {
        assert_eq!(
            parse_command("/start@sozvezdie_bot"),
            ("start".to_string(), String::new())
        );
        assert_eq!(
            parse_command("/Reload now"),
            ("reload".to_string(), "now".to_string())
        );
    }
}
