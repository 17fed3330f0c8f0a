//! Telegram update handlers.
//!
//! Each handler is a thin adapter: pull the ids out of the update, call one
//! core operation, render the outcome as text.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{ChatJoinRequest, Message},
};
use tracing::{error, info};

use sgb_core::domain::{ChatId, JoinRequest, UserId};

use crate::router::AppState;

mod commands;
mod contact;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Only private chats; the gated channels are never conversed in.
    if !msg.chat.is_private() {
        return Ok(());
    }

    if msg.contact().is_some() {
        return contact::handle_contact(bot, msg, state).await;
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(bot, msg, state).await;
        }
    }

    bot.send_message(msg.chat.id, crate::render::help(&state.cfg.channels))
        .await?;
    Ok(())
}

pub async fn handle_join_request(
    _bot: Bot,
    req: ChatJoinRequest,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let request = JoinRequest {
        user_id: UserId(req.from.id.0 as i64),
        chat_id: ChatId(req.chat.id.0),
        invite_link: req.invite_link.as_ref().map(|l| l.invite_link.clone()),
    };

    match state.gate.settle_join_request(&request).await {
        Ok(decision) => info!(
            user = request.user_id.0,
            chat = request.chat_id.0,
            ?decision,
            "join request settled"
        ),
        Err(e) => error!(
            user = request.user_id.0,
            chat = request.chat_id.0,
            error = %e,
            "join request could not be settled"
        ),
    }
    Ok(())
}
