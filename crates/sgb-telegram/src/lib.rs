//! Telegram adapter (teloxide).
//!
//! Implements the `sgb-core` `ChannelPlatform` port over the Telegram Bot API
//! and hosts the update dispatcher that drives the core operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use tokio::time::sleep;

pub mod handlers;
pub mod render;
pub mod router;

use sgb_core::{
    domain::{ChatId, UserId},
    errors::Error,
    ports::ChannelPlatform,
    Result,
};

#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self::new(Bot::new(token))
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_user(user_id: UserId) -> Result<teloxide::types::UserId> {
        u64::try_from(user_id.0)
            .map(teloxide::types::UserId)
            .map_err(|_| Error::Validation(format!("not a telegram user id: {}", user_id.0)))
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
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
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::debug!(wait = ?d, "telegram flood control; retrying");
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

#[async_trait]
impl ChannelPlatform for TelegramPlatform {
    async fn create_invite(
        &self,
        chat_id: ChatId,
        expires_at: DateTime<Utc>,
        name: &str,
    ) -> Result<String> {
        let link = self
            .with_retry(|| {
                self.bot
                    .create_chat_invite_link(Self::tg_chat(chat_id))
                    .expire_date(expires_at)
                    .creates_join_request(true)
                    .name(name.to_string())
            })
            .await?;
        Ok(link.invite_link)
    }

    async fn approve_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        let user = Self::tg_user(user_id)?;
        self.with_retry(|| {
            self.bot
                .approve_chat_join_request(Self::tg_chat(chat_id), user)
        })
        .await?;
        Ok(())
    }

    async fn decline_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        let user = Self::tg_user(user_id)?;
        self.with_retry(|| {
            self.bot
                .decline_chat_join_request(Self::tg_chat(chat_id), user)
        })
        .await?;
        Ok(())
    }

    async fn revoke_invite(&self, chat_id: ChatId, url: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .revoke_chat_invite_link(Self::tg_chat(chat_id), url.to_string())
        })
        .await?;
        Ok(())
    }

    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        // Ban then unban: the member is removed but may rejoin with a new invite.
        let user = Self::tg_user(user_id)?;
        self.with_retry(|| self.bot.ban_chat_member(Self::tg_chat(chat_id), user))
            .await?;
        self.with_retry(|| {
            self.bot
                .unban_chat_member(Self::tg_chat(chat_id), user)
                .only_if_banned(true)
        })
        .await?;
        Ok(())
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.with_retry(|| self.bot.send_message(Self::tg_chat(chat_id), text.to_string()))
            .await?;
        Ok(())
    }
}
