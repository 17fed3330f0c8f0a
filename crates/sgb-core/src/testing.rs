//! Hand-written fakes of the ports, shared by the unit tests.

use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    config::Config,
    domain::{ChatId, Channel, Period, UserAccount, UserId},
    errors::Error,
    ports::{
        ChannelPlatform, Lookup, PriceFeed, PriceWindow, SubscriptionPush, SubscriptionRecord,
        SubscriptionSource,
    },
    store::Accounts,
    sync::{Registrar, SyncEngine},
    Result,
};

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub(crate) fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    date(y, m, d).and_hms_opt(h, 0, 0).unwrap().and_utc()
}

pub(crate) fn record(days: u32, start: Option<NaiveDate>, flags: &[&str]) -> SubscriptionRecord {
    SubscriptionRecord {
        days,
        start_date: start,
        entitlements: flags.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
    }
}

pub(crate) fn test_config() -> Config {
    Config {
        bot_token: "x".to_string(),
        subscription_source_url: "http://localhost/sheet".to_string(),
        twelve_api_key: "k".to_string(),
        price_feed_url: "http://localhost/feed".to_string(),
        support_id: "@support".to_string(),
        channels: vec![
            Channel {
                flag: "Hotline".to_string(),
                chat_id: ChatId(-1001),
            },
            Channel {
                flag: "CIP".to_string(),
                chat_id: ChatId(-1002),
            },
        ],
        data_file: PathBuf::from("/tmp/sgb-test-users.json"),
        link_expire: Duration::from_secs(600),
        max_links_per_day: 5,
        alert_interval: Duration::from_millis(20),
        alert_warmup: Duration::from_millis(0),
        expiry_check_interval: Duration::from_millis(20),
        expiry_warning_cooldown: Duration::from_secs(3 * 3600),
        alert_days: 3,
        sync_timeout: Duration::from_secs(1),
        price_timeout: Duration::from_secs(1),
        register_attempts: 1,
        register_backoff: Duration::from_millis(1),
        health_port: 0,
    }
}

pub(crate) fn sync_engine(source: Arc<FakeSource>, accounts: Arc<Accounts>) -> SyncEngine {
    let cfg = test_config();
    let registrar = Registrar::new(source.clone(), 1, Duration::from_millis(1));
    SyncEngine::new(
        source,
        accounts,
        registrar,
        cfg.entitlement_flags(),
        cfg.sync_timeout,
    )
}

/// Account with `flags` and `days` left as of `today`.
pub(crate) fn active_account(id: &str, phone: &str, flags: &[&str], days: u32, today: NaiveDate) -> UserAccount {
    let mut acc = UserAccount::new(id, phone, Utc::now());
    acc.entitlements = flags.iter().map(|s| s.to_string()).collect();
    acc.subscription_days = days;
    acc.subscription_start = Some(today);
    acc.refresh_days_left(today);
    acc
}

// ============== Subscription source ==============

#[derive(Default)]
pub(crate) struct FakeSource {
    records: Mutex<HashMap<String, SubscriptionRecord>>,
    down: AtomicBool,
    failing_pushes: AtomicUsize,
    pushes: Mutex<Vec<SubscriptionPush>>,
    lookups: AtomicUsize,
}

impl FakeSource {
    pub(crate) fn set(&self, phone: &str, rec: SubscriptionRecord) {
        self.records.lock().unwrap().insert(phone.to_string(), rec);
    }

    pub(crate) fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_pushes(&self, n: usize) {
        self.failing_pushes.store(n, Ordering::SeqCst);
    }

    pub(crate) fn pushes(&self) -> Vec<SubscriptionPush> {
        self.pushes.lock().unwrap().clone()
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Wait (briefly) for background pushes to land.
    pub(crate) async fn wait_for_pushes(&self, n: usize) -> Vec<SubscriptionPush> {
        for _ in 0..200 {
            let pushes = self.pushes();
            if pushes.len() >= n {
                return pushes;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.pushes()
    }
}

#[async_trait]
impl SubscriptionSource for FakeSource {
    async fn lookup(&self, phone: &str) -> Result<Lookup> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::External("connection refused".to_string()));
        }
        Ok(match self.records.lock().unwrap().get(phone) {
            Some(r) => Lookup::Found(r.clone()),
            None => Lookup::NotFound,
        })
    }

    async fn push(&self, update: &SubscriptionPush) -> Result<()> {
        let failing = self.failing_pushes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_pushes.store(failing - 1, Ordering::SeqCst);
            return Err(Error::External("503 service unavailable".to_string()));
        }
        self.pushes.lock().unwrap().push(update.clone());
        Ok(())
    }
}

// ============== Price feed ==============

#[derive(Default)]
pub(crate) struct FakeFeed {
    windows: Mutex<HashMap<(String, Period), PriceWindow>>,
    spots: Mutex<HashMap<String, f64>>,
    window_calls: AtomicUsize,
    spot_calls: AtomicUsize,
    delay: Mutex<Duration>,
}

impl FakeFeed {
    /// Make every fetch take `delay`, to widen race windows.
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    pub(crate) fn set_window(&self, symbol: &str, period: Period, high: f64, low: f64, close: f64) {
        self.windows.lock().unwrap().insert(
            (symbol.to_string(), period),
            PriceWindow { high, low, close },
        );
    }

    pub(crate) fn set_spot(&self, symbol: &str, price: f64) {
        self.spots.lock().unwrap().insert(symbol.to_string(), price);
    }

    pub(crate) fn window_calls(&self) -> usize {
        self.window_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn spot_calls(&self) -> usize {
        self.spot_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFeed for FakeFeed {
    async fn window(&self, symbol: &str, period: Period) -> Result<PriceWindow> {
        self.window_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.windows
            .lock()
            .unwrap()
            .get(&(symbol.to_string(), period))
            .copied()
            .ok_or_else(|| Error::External(format!("no data for {symbol}")))
    }

    async fn spot(&self, symbol: &str) -> Result<f64> {
        self.spot_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.spots
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::External(format!("no price for {symbol}")))
    }
}

// ============== Channel platform ==============

#[derive(Default)]
pub(crate) struct FakePlatform {
    next_invite: AtomicUsize,
    fail_invites: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<(ChatId, String)>>,
    approved: Mutex<Vec<(ChatId, UserId)>>,
    declined: Mutex<Vec<(ChatId, UserId)>>,
    revoked: Mutex<Vec<(ChatId, String)>>,
    removed: Mutex<Vec<(ChatId, UserId)>>,
    send_delay: Mutex<Duration>,
    fail_approvals: AtomicBool,
}

impl FakePlatform {
    pub(crate) fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_fail_approvals(&self, v: bool) {
        self.fail_approvals.store(v, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_invites(&self, v: bool) {
        self.fail_invites.store(v, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_sends(&self, v: bool) {
        self.fail_sends.store(v, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn approved(&self) -> Vec<(ChatId, UserId)> {
        self.approved.lock().unwrap().clone()
    }

    pub(crate) fn declined(&self) -> Vec<(ChatId, UserId)> {
        self.declined.lock().unwrap().clone()
    }

    pub(crate) fn revoked(&self) -> Vec<(ChatId, String)> {
        self.revoked.lock().unwrap().clone()
    }

    pub(crate) fn removed(&self) -> Vec<(ChatId, UserId)> {
        self.removed.lock().unwrap().clone()
    }

    /// Wait (briefly) for spawned notifications to land.
    pub(crate) async fn wait_for_sent(&self, n: usize) -> Vec<(ChatId, String)> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl ChannelPlatform for FakePlatform {
    async fn create_invite(
        &self,
        chat_id: ChatId,
        _expires_at: DateTime<Utc>,
        _name: &str,
    ) -> Result<String> {
        if self.fail_invites.load(Ordering::SeqCst) {
            return Err(Error::External("telegram error: Bad Request".to_string()));
        }
        let n = self.next_invite.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://t.me/+invite{}_{n}", chat_id.0.abs()))
    }

    async fn approve_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        if self.fail_approvals.load(Ordering::SeqCst) {
            return Err(Error::External("telegram error: USER_ALREADY_PARTICIPANT".to_string()));
        }
        self.approved.lock().unwrap().push((chat_id, user_id));
        Ok(())
    }

    async fn decline_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.declined.lock().unwrap().push((chat_id, user_id));
        Ok(())
    }

    async fn revoke_invite(&self, chat_id: ChatId, url: &str) -> Result<()> {
        self.revoked.lock().unwrap().push((chat_id, url.to_string()));
        Ok(())
    }

    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.removed.lock().unwrap().push((chat_id, user_id));
        Ok(())
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        let delay = *self.send_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::External("telegram error: Forbidden".to_string()));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}
