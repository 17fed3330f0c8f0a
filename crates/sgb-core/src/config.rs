use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::{ChatId, Channel},
    errors::Error,
    Result,
};

/// Typed configuration, read from the environment (with `.env` fallback).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub subscription_source_url: String,
    pub twelve_api_key: String,
    pub price_feed_url: String,
    pub support_id: String,

    // Gated channels
    pub channels: Vec<Channel>,

    // Storage
    pub data_file: PathBuf,

    // Invites
    pub link_expire: Duration,
    pub max_links_per_day: u32,

    // Alerts
    pub alert_interval: Duration,
    pub alert_warmup: Duration,

    // Expiry warnings
    pub expiry_check_interval: Duration,
    pub expiry_warning_cooldown: Duration,
    pub alert_days: u32,

    // External calls
    pub sync_timeout: Duration,
    pub price_timeout: Duration,
    pub register_attempts: u32,
    pub register_backoff: Duration,

    // Health endpoint
    pub health_port: u16,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("BOT_TOKEN")
            .or_else(|| env_str("TELEGRAM_BOT_TOKEN"))
            .and_then(non_empty)
            .ok_or_else(|| Error::Config("BOT_TOKEN environment variable is required".to_string()))?;

        let subscription_source_url = env_str("SUBSCRIPTION_SOURCE_URL")
            .or_else(|| env_str("GOOGLE_SHEET_URL"))
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("SUBSCRIPTION_SOURCE_URL environment variable is required".to_string())
            })?;

        let twelve_api_key = env_str("TWELVE_API_KEY").unwrap_or_default();
        if twelve_api_key.trim().is_empty() {
            tracing::warn!("TWELVE_API_KEY is not set; price alerts will not work");
        }
        let price_feed_url = env_str("PRICE_FEED_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "https://api.twelvedata.com".to_string());
        let support_id = env_str("SUPPORT_ID").unwrap_or_else(|| "@your_support_id".to_string());

        // Channels: CHANNELS="Hotline=-100123,CIP=-100456" or the legacy pair of ids.
        let channels = match env_str("CHANNELS").and_then(non_empty) {
            Some(raw) => parse_channels(&raw)?,
            None => legacy_channels()?,
        };
        if channels.is_empty() {
            return Err(Error::Config(
                "CHANNELS (or CHANNEL_ID / CIP_CHANNEL_ID) must name at least one channel"
                    .to_string(),
            ));
        }

        let data_file =
            PathBuf::from(env_str("DATA_FILE").unwrap_or_else(|| "user_data.json".to_string()));

        let link_expire = Duration::from_secs(60 * env_u64("LINK_EXPIRE_MINUTES").unwrap_or(10));
        let max_links_per_day = env_u32("MAX_LINKS_PER_DAY").unwrap_or(5);

        let alert_interval = Duration::from_secs(env_u64("ALERT_INTERVAL_SECONDS").unwrap_or(300));
        let alert_warmup = Duration::from_secs(env_u64("ALERT_WARMUP_SECONDS").unwrap_or(10));

        let expiry_check_interval =
            Duration::from_secs(env_u64("EXPIRY_CHECK_INTERVAL_SECONDS").unwrap_or(3 * 3600));
        let expiry_warning_cooldown =
            Duration::from_secs(env_u64("EXPIRY_WARNING_COOLDOWN_SECONDS").unwrap_or(3 * 3600));
        let alert_days = env_u32("ALERT_DAYS").unwrap_or(3);

        let sync_timeout = Duration::from_secs(env_u64("SYNC_TIMEOUT_SECONDS").unwrap_or(30));
        let price_timeout = Duration::from_secs(env_u64("PRICE_TIMEOUT_SECONDS").unwrap_or(15));
        let register_attempts = env_u32("REGISTER_ATTEMPTS").unwrap_or(3).max(1);
        let register_backoff =
            Duration::from_millis(env_u64("REGISTER_BACKOFF_MS").unwrap_or(2_000));

        let health_port = env_u64("PORT")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(10_000);

        Ok(Self {
            bot_token,
            subscription_source_url,
            twelve_api_key,
            price_feed_url,
            support_id,
            channels,
            data_file,
            link_expire,
            max_links_per_day,
            alert_interval,
            alert_warmup,
            expiry_check_interval,
            expiry_warning_cooldown,
            alert_days,
            sync_timeout,
            price_timeout,
            register_attempts,
            register_backoff,
            health_port,
        })
    }

    /// Entitlement flags of every configured channel, in configuration order.
    pub fn entitlement_flags(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.flag.clone()).collect()
    }
}

fn legacy_channels() -> Result<Vec<Channel>> {
    let mut out = Vec::new();
    for (key, flag) in [("CHANNEL_ID", "Hotline"), ("CIP_CHANNEL_ID", "CIP")] {
        let Some(raw) = env_str(key).and_then(non_empty) else {
            continue;
        };
        let id = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Config(format!("{key} is not a valid chat id: {raw}")))?;
        if id != 0 {
            out.push(Channel {
                flag: flag.to_string(),
                chat_id: ChatId(id),
            });
        }
    }
    Ok(out)
}

/// Parse `Flag=chat_id` pairs separated by commas.
pub fn parse_channels(raw: &str) -> Result<Vec<Channel>> {
    let mut out: Vec<Channel> = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((flag, id)) = part.split_once('=') else {
            return Err(Error::Config(format!("channel entry must be Flag=chat_id: {part}")));
        };
        let flag = flag.trim();
        if flag.is_empty() {
            return Err(Error::Config(format!("channel entry has empty flag: {part}")));
        }
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Config(format!("invalid chat id in channel entry: {part}")))?;
        if out.iter().any(|c| c.flag == flag) {
            return Err(Error::Config(format!("duplicate channel flag: {flag}")));
        }
        out.push(Channel {
            flag: flag.to_string(),
            chat_id: ChatId(id),
        });
    }
    Ok(out)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
