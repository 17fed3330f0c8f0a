use std::sync::Arc;

use chrono::Utc;
use teloxide::{
    prelude::*,
    types::{ButtonRequest, KeyboardButton, KeyboardMarkup},
};
use tracing::{debug, warn};

use sgb_core::{domain::Period, errors::Error};

use crate::{render, router::AppState};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Command {
    Start,
    Subscription,
    Join(Option<String>),
    Analysis { asset: String, period: Option<String> },
    Assets,
    Support,
    Help,
}

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

fn to_command(text: &str) -> Command {
    let (cmd, rest) = parse_command(text);
    let arg = (!rest.is_empty()).then(|| rest.clone());
    match cmd.as_str() {
        "start" => Command::Start,
        "subscription" | "status" => Command::Subscription,
        "join" => Command::Join(arg),
        "analysis" => {
            // The period is the last word when it parses as one; asset labels may contain spaces.
            match rest.rsplit_once(char::is_whitespace) {
                Some((asset, last)) if last.parse::<Period>().is_ok() => Command::Analysis {
                    asset: asset.trim().to_string(),
                    period: Some(last.to_string()),
                },
                _ => Command::Analysis {
                    asset: rest,
                    period: None,
                },
            }
        }
        "assets" => Command::Assets,
        "support" => Command::Support,
        _ => Command::Help,
    }
}

fn contact_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new("📱 Share phone number").request(ButtonRequest::Contact)
    ]])
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user_id = user.id.0.to_string();
    let command = to_command(text);
    debug!(user = %user_id, ?command, "command");

    match command {
        Command::Start => {
            let enrolled = matches!(state.sync.accounts().get(&user_id), Ok(Some(_)));
            if enrolled {
                let reply = subscription_reply(&state, &user_id).await;
                bot.send_message(msg.chat.id, reply).await?;
            } else {
                bot.send_message(msg.chat.id, render::welcome())
                    .reply_markup(contact_keyboard())
                    .await?;
            }
        }
        Command::Subscription => {
            let reply = subscription_reply(&state, &user_id).await;
            bot.send_message(msg.chat.id, reply).await?;
        }
        Command::Join(flag) => {
            let reply = join_reply(&state, &user_id, flag.as_deref()).await;
            bot.send_message(msg.chat.id, reply).await?;
        }
        Command::Analysis { asset, period } => {
            let reply = analysis_reply(&state, &user_id, &asset, period.as_deref()).await;
            bot.send_message(msg.chat.id, reply).await?;
        }
        Command::Assets => {
            bot.send_message(msg.chat.id, render::assets()).await?;
        }
        Command::Support => {
            bot.send_message(msg.chat.id, render::support(&state.cfg.support_id))
                .await?;
        }
        Command::Help => {
            bot.send_message(msg.chat.id, render::help(&state.cfg.channels))
                .await?;
        }
    }
    Ok(())
}

async fn subscription_reply(state: &AppState, user_id: &str) -> String {
    match state.gate.subscription_status(user_id).await {
        Ok(status) => render::status(&status, Utc::now().date_naive()),
        Err(e) => e.user_message(),
    }
}

async fn join_reply(state: &AppState, user_id: &str, flag: Option<&str>) -> String {
    let flag = match (flag, state.gate.channels()) {
        (Some(f), _) => f.to_string(),
        (None, [only]) => only.flag.clone(),
        (None, _) => return render::help(state.gate.channels()),
    };

    let now = Utc::now();
    match state.gate.request_invite_at(user_id, &flag, now).await {
        Ok(token) => render::invite(&token, now),
        Err(e) => e.user_message(),
    }
}

async fn analysis_reply(state: &AppState, user_id: &str, asset: &str, period: Option<&str>) -> String {
    let Some((label, symbol)) = render::resolve_asset(asset) else {
        return format!("⚠️ Unknown asset: {asset}\n\n{}", render::assets());
    };
    let period = match period.map(str::parse::<Period>).transpose() {
        Ok(p) => p.unwrap_or(Period::Week),
        Err(e) => return e.user_message(),
    };

    match state.alerts.watch(user_id, symbol, period).await {
        Ok(levels) => render::levels(label, symbol, period, &levels),
        Err(e @ Error::UnknownUser(_)) => e.user_message(),
        Err(e) => {
            warn!(user = %user_id, %symbol, %period, error = %e, "analysis failed");
            "⚠️ Price data is unavailable right now. Please try again later.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bot_mention_and_lowercases() {
        assert_eq!(
            parse_command("/Join@sgb_bot  Hotline "),
            ("join".to_string(), "Hotline".to_string())
        );
        assert_eq!(parse_command("/start"), ("start".to_string(), String::new()));
    }

    #[test]
    fn maps_commands() {
        assert_eq!(to_command("/start"), Command::Start);
        assert_eq!(to_command("/status"), Command::Subscription);
        assert_eq!(to_command("/join"), Command::Join(None));
        assert_eq!(to_command("/join CIP"), Command::Join(Some("CIP".to_string())));
        assert_eq!(to_command("/whatever"), Command::Help);
    }

    #[test]
    fn analysis_splits_trailing_period() {
        assert_eq!(
            to_command("/analysis Gold ounce 3m"),
            Command::Analysis {
                asset: "Gold ounce".to_string(),
                period: Some("3m".to_string())
            }
        );
        assert_eq!(
            to_command("/analysis XAU/USD"),
            Command::Analysis {
                asset: "XAU/USD".to_string(),
                period: None
            }
        );
        assert_eq!(
            to_command("/analysis Gold ounce"),
            Command::Analysis {
                asset: "Gold ounce".to_string(),
                period: None
            }
        );
    }
}
