use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    domain::{ChatId, Period, UserId},
    Result,
};

// ============== Subscription source ==============

/// Authoritative subscription terms as reported by the external source.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionRecord {
    pub days: u32,
    pub start_date: Option<NaiveDate>,
    pub entitlements: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    Found(SubscriptionRecord),
    NotFound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushAction {
    Register,
}

impl PushAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PushAction::Register => "register",
        }
    }
}

/// Local account state pushed to the source.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionPush {
    pub action: PushAction,
    pub phone: String,
    pub name: String,
    pub days: u32,
    pub start_date: Option<NaiveDate>,
    pub days_left: u32,
    /// Every known flag with its local value.
    pub flags: Vec<(String, bool)>,
}

/// External system of record for subscriptions, keyed by normalized phone.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn lookup(&self, phone: &str) -> Result<Lookup>;

    async fn push(&self, update: &SubscriptionPush) -> Result<()>;
}

// ============== Price feed ==============

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candle {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// High/low/close summary of a look-back window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PriceWindow {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PriceWindow {
    /// Aggregate candles ordered oldest to newest. `None` when there are none.
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        let last = candles.last()?;
        let high = candles
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        Some(Self {
            high,
            low,
            close: last.close,
        })
    }
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn window(&self, symbol: &str, period: Period) -> Result<PriceWindow>;

    async fn spot(&self, symbol: &str) -> Result<f64>;
}

// ============== Channel platform ==============

/// Bot-API operations the core needs from the chat platform.
#[async_trait]
pub trait ChannelPlatform: Send + Sync {
    /// Create a join-request-gated invite link that expires at `expires_at`.
    async fn create_invite(
        &self,
        chat_id: ChatId,
        expires_at: DateTime<Utc>,
        name: &str,
    ) -> Result<String>;

    async fn approve_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;

    async fn decline_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;

    async fn revoke_invite(&self, chat_id: ChatId, url: &str) -> Result<()>;

    /// Remove a member without a permanent ban.
    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()>;
}
