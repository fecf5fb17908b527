//! Channel-membership gate over `getChatMember`.

use async_trait::async_trait;

use teloxide::{prelude::*, types::Recipient};

use ssb_core::{
    domain::UserId,
    ports::{MembershipPort, MembershipStatus},
};

pub struct TelegramMembershipGate {
    bot: Bot,
    channel: Recipient,
}

impl TelegramMembershipGate {
    /// `channel` is either an `@handle` or a numeric chat id.
    pub fn new(bot: Bot, channel: &str) -> Self {
        let channel = match channel.parse::<i64>() {
            Ok(id) => Recipient::Id(teloxide::types::ChatId(id)),
            Err(_) => Recipient::ChannelUsername(channel.to_string()),
        };
        Self { bot, channel }
    }
}

#[async_trait]
impl MembershipPort for TelegramMembershipGate {
    async fn check_membership(&self, user_id: UserId) -> MembershipStatus {
        let tg_user = teloxide::types::UserId(user_id.0 as u64);
        match self.bot.get_chat_member(self.channel.clone(), tg_user).await {
            Ok(member) => {
                let kind = member.kind;
                if kind.is_owner() || kind.is_administrator() || kind.is_member() {
                    MembershipStatus::Subscribed
                } else {
                    MembershipStatus::NotSubscribed
                }
            }
            // Transport failure is a classification, not an error: the caller
            // must treat it as "cannot grant".
            Err(e) => {
                tracing::warn!(user_id = user_id.0, "membership check failed: {e}");
                MembershipStatus::Unknown
            }
        }
    }
}
