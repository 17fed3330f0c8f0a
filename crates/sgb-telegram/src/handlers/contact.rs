use std::sync::Arc;

use chrono::Utc;
use teloxide::{prelude::*, types::KeyboardRemove};
use tracing::warn;

use crate::{render, router::AppState};

pub async fn handle_contact(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let (Some(user), Some(contact)) = (msg.from(), msg.contact()) else {
        return Ok(());
    };

    // Only the sender's own number may be enrolled.
    if contact.user_id != Some(user.id) {
        bot.send_message(
            msg.chat.id,
            "⚠️ Please share your own phone number with the button.",
        )
        .await?;
        return Ok(());
    }

    let user_id = user.id.0.to_string();
    let name = match &user.last_name {
        Some(last) => format!("{} {last}", user.first_name),
        None => user.first_name.clone(),
    };

    let now = Utc::now();
    let reply = match state
        .sync
        .enroll(&user_id, &name, &contact.phone_number, now)
        .await
    {
        Ok((account, outcome)) => {
            let today = now.date_naive();
            let status = state.gate.status_of(&account, outcome, today);
            format!(
                "✅ Registered.\n\n{}\n\n{}",
                render::status(&status, today),
                render::help(&state.cfg.channels)
            )
        }
        Err(e) => {
            warn!(user = %user_id, error = %e, "enrollment failed");
            e.user_message()
        }
    };

    bot.send_message(msg.chat.id, reply)
        .reply_markup(KeyboardRemove::new())
        .await?;
    Ok(())
}
