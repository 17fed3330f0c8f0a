use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric). Channels are negative, private chats equal the user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// A gated channel and the entitlement flag required to enter it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub flag: String,
    pub chat_id: ChatId,
}

/// Instruments offered by the analysis menu: (label, feed symbol).
pub const ASSETS: &[(&str, &str)] = &[
    ("Gold ounce", "XAU/USD"),
    ("EURUSD", "EUR/USD"),
    ("GBPUSD", "GBP/USD"),
    ("USDJPY", "USD/JPY"),
    ("DXY", "DXY"),
    ("DJI", "DJI"),
    ("NAS100", "NASDAQ"),
];

// ============== Periods ==============

/// Look-back window used to compute a level ladder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1w")]
    Week,
    #[serde(rename = "1m")]
    Month,
    #[serde(rename = "3m")]
    Quarter,
    #[serde(rename = "6m")]
    HalfYear,
}

impl Period {
    pub const ALL: [Period; 4] = [
        Period::Week,
        Period::Month,
        Period::Quarter,
        Period::HalfYear,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Period::Week => "1w",
            Period::Month => "1m",
            Period::Quarter => "3m",
            Period::HalfYear => "6m",
        }
    }

    pub fn days(self) -> i64 {
        match self {
            Period::Week => 7,
            Period::Month => 30,
            Period::Quarter => 90,
            Period::HalfYear => 180,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Week => "last week",
            Period::Month => "last month",
            Period::Quarter => "last three months",
            Period::HalfYear => "last six months",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim().to_lowercase();
        Period::ALL
            .into_iter()
            .find(|p| p.code() == code)
            .ok_or_else(|| Error::Validation(format!("unknown period: {s} (use 1w, 1m, 3m or 6m)")))
    }
}

// ============== Alert keys ==============

/// Identity of "this user was already told about this level for this watch entry".
///
/// The level is kept in hundredths so two levels that round to the same cent
/// compare equal without float comparisons.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AlertKey {
    pub symbol: String,
    pub period: Period,
    pub level_cents: i64,
}

impl AlertKey {
    pub fn new(symbol: &str, period: Period, level: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            period,
            level_cents: (level * 100.0).round() as i64,
        }
    }

    pub fn level(&self) -> f64 {
        self.level_cents as f64 / 100.0
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{:.2}", self.symbol, self.period, self.level())
    }
}

impl FromStr for AlertKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.rsplitn(3, '|');
        let (Some(level), Some(period), Some(symbol)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Validation(format!("malformed alert key: {s}")));
        };
        let level: f64 = level
            .parse()
            .map_err(|_| Error::Validation(format!("malformed alert level: {s}")))?;
        Ok(Self::new(symbol, period.parse()?, level))
    }
}

impl TryFrom<String> for AlertKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AlertKey> for String {
    fn from(k: AlertKey) -> Self {
        k.to_string()
    }
}

// ============== Accounts ==============

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub symbol: String,
    pub period: Period,
    pub last_processed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssuedInvite {
    pub channel: String,
    pub url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Local cache of one user's subscription plus bot bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub phone: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entitlements: BTreeSet<String>,
    #[serde(default)]
    pub subscription_days: u32,
    #[serde(default)]
    pub subscription_start: Option<NaiveDate>,
    #[serde(default)]
    pub days_left: u32,
    #[serde(default)]
    pub link_issuance: BTreeMap<NaiveDate, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_invite: Option<IssuedInvite>,
    #[serde(default)]
    pub notified_levels: BTreeSet<AlertKey>,
    #[serde(default)]
    pub watch_list: Vec<WatchEntry>,
    #[serde(default)]
    pub last_expiry_warning_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_on: Option<NaiveDate>,
    pub registered_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(id: impl Into<String>, phone: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            phone: phone.into(),
            name: String::new(),
            entitlements: BTreeSet::new(),
            subscription_days: 0,
            subscription_start: None,
            days_left: 0,
            link_issuance: BTreeMap::new(),
            last_invite: None,
            notified_levels: BTreeSet::new(),
            watch_list: Vec::new(),
            last_expiry_warning_at: None,
            revoked_on: None,
            registered_at: now,
        }
    }

    /// Private chat with this user, when the id is a numeric platform id.
    pub fn chat_id(&self) -> Option<ChatId> {
        self.id.parse::<i64>().ok().map(ChatId)
    }

    pub fn days_left_on(&self, today: NaiveDate) -> u32 {
        days_left(self.subscription_days, self.subscription_start, today)
    }

    pub fn refresh_days_left(&mut self, today: NaiveDate) {
        self.days_left = self.days_left_on(today);
    }

    pub fn expires_on(&self) -> Option<NaiveDate> {
        self.subscription_start
            .map(|start| start + Duration::days(i64::from(self.subscription_days)))
    }

    pub fn is_entitled(&self, flag: &str) -> bool {
        self.entitlements.contains(flag)
    }

    /// Access decision against the currently cached state.
    pub fn may_enter(&self, flag: &str) -> bool {
        self.is_entitled(flag) && self.days_left > 0
    }

    pub fn links_issued_on(&self, day: NaiveDate) -> u32 {
        self.link_issuance.get(&day).copied().unwrap_or(0)
    }

    /// Count one issued invite against `day`, dropping counters of earlier days.
    pub fn record_invite(&mut self, day: NaiveDate, invite: IssuedInvite) {
        self.link_issuance.retain(|d, _| *d >= day);
        *self.link_issuance.entry(day).or_insert(0) += 1;
        self.last_invite = Some(invite);
    }

    pub fn is_watching(&self, symbol: &str, period: Period) -> bool {
        self.watch_list
            .iter()
            .any(|w| w.symbol == symbol && w.period == period)
    }

    /// Append a watch entry unless the pair is already watched. Returns whether it was added.
    pub fn watch(&mut self, symbol: &str, period: Period, now: DateTime<Utc>) -> bool {
        if self.is_watching(symbol, period) {
            return false;
        }
        self.watch_list.push(WatchEntry {
            symbol: symbol.to_string(),
            period,
            last_processed_at: now,
        });
        true
    }
}

/// `max(0, subscription_days - days_elapsed(start, today))`; no start means no days.
///
/// A start date in the future counts as zero elapsed days.
pub fn days_left(subscription_days: u32, start: Option<NaiveDate>, today: NaiveDate) -> u32 {
    let Some(start) = start else {
        return 0;
    };
    let elapsed = (today - start).num_days().max(0);
    (i64::from(subscription_days) - elapsed).max(0) as u32
}

/// Strip everything but digits and keep the national part (last 10 digits).
pub fn normalize_phone(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return Err(Error::Validation(format!(
            "phone number must have at least 10 digits: {raw}"
        )));
    }
    Ok(digits[digits.len() - 10..].to_string())
}

// ============== Invites & join requests ==============

/// Capability handed to exactly one join-request flow.
#[derive(Clone, Debug, PartialEq)]
pub struct InviteToken {
    pub channel: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub join_request_gated: bool,
}

/// A pending "please let me in" request raised by clicking a gated invite.
#[derive(Clone, Debug)]
pub struct JoinRequest {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub invite_link: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinDecision {
    Approve,
    Decline,
}
