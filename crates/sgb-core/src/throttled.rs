use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, UserId},
    ports::ChannelPlatform,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two bot API calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between calls that target the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),     // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return how long to wait before using it.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// `ChannelPlatform` decorator that spaces out outbound calls.
///
/// Alert cycles can fan out many messages at once; spacing them keeps the bot
/// under the platform's flood limits most of the time.
pub struct ThrottledPlatform {
    inner: Arc<dyn ChannelPlatform>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledPlatform {
    pub fn new(inner: Arc<dyn ChannelPlatform>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle(&self, chat_id: ChatId) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id.0).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl ChannelPlatform for ThrottledPlatform {
    async fn create_invite(
        &self,
        chat_id: ChatId,
        expires_at: DateTime<Utc>,
        name: &str,
    ) -> Result<String> {
        self.throttle(chat_id).await;
        self.inner.create_invite(chat_id, expires_at, name).await
    }

    async fn approve_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.throttle(chat_id).await;
        self.inner.approve_join_request(chat_id, user_id).await
    }

    async fn decline_join_request(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.throttle(chat_id).await;
        self.inner.decline_join_request(chat_id, user_id).await
    }

    async fn revoke_invite(&self, chat_id: ChatId, url: &str) -> Result<()> {
        self.throttle(chat_id).await;
        self.inner.revoke_invite(chat_id, url).await
    }

    async fn remove_member(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.throttle(chat_id).await;
        self.inner.remove_member(chat_id, user_id).await
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.throttle(chat_id).await;
        self.inner.send_text(chat_id, text).await
    }
}
