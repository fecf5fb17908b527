//! Telegram adapter (teloxide).
//!
//! Implements the `ssb-core` messaging and membership ports over the
//! Telegram Bot API.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup},
};

use tokio::time::sleep;

pub mod gate;
pub mod handlers;
pub mod router;

use ssb_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ButtonAction, InlineKeyboard},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

fn to_markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    let mut rows = Vec::with_capacity(keyboard.rows.len());
    for row in keyboard.rows {
        let mut buttons = Vec::with_capacity(row.len());
        for button in row {
            match button.action {
                ButtonAction::Callback(data) => {
                    buttons.push(InlineKeyboardButton::callback(button.label, data));
                }
                // URLs were validated at menu load; a parse failure here only
                // drops the one button instead of the whole screen.
                ButtonAction::Url(raw) => match url::Url::parse(&raw) {
                    Ok(href) => buttons.push(InlineKeyboardButton::url(button.label, href)),
                    Err(e) => tracing::warn!("dropping button with bad url `{raw}`: {e}"),
                },
            }
        }
        rows.push(buttons);
    }
    InlineKeyboardMarkup::new(rows)
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.map(to_markup);
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(Self::tg_chat(chat_id), text.to_string());
                if let Some(m) = &markup {
                    req = req.reply_markup(m.clone());
                }
                req
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let markup = keyboard.map(to_markup);
        self.with_retry(|| {
            let mut req = self.bot.edit_message_text(
                Self::tg_chat(msg.chat_id),
                Self::tg_msg_id(msg.message_id),
                text.to_string(),
            );
            if let Some(m) = &markup {
                req = req.reply_markup(m.clone());
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssb_core::messaging::types::InlineButton;
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn markup_keeps_layout_and_maps_button_kinds() {
        let kb = InlineKeyboard::new(vec![
            vec![
                InlineButton::callback("💳 Кредитные карты", "credit_cards"),
                InlineButton::url("📢 Наш канал", "https://t.me/sozvezdie_skidok"),
            ],
            vec![InlineButton::callback("🔙 Назад", "main_menu")],
        ]);

        let markup = to_markup(kb);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);

        match &markup.inline_keyboard[0][0].kind {
            InlineKeyboardButtonKind::CallbackData(data) => assert_eq!(data, "credit_cards"),
            other => panic!("expected callback button, got {other:?}"),
        }
        match &markup.inline_keyboard[0][1].kind {
            InlineKeyboardButtonKind::Url(href) => {
                assert_eq!(href.as_str(), "https://t.me/sozvezdie_skidok");
            }
            other => panic!("expected url button, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_url_drops_only_that_button() {
        let kb = InlineKeyboard::new(vec![vec![
            InlineButton::url("broken", "not a url"),
            InlineButton::callback("ok", "main_menu"),
        ]]);

        let markup = to_markup(kb);
        assert_eq!(markup.inline_keyboard[0].len(), 1);
    }
}
