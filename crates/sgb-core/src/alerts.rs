//! Watch lists and the per-user price-level scan.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    domain::{AlertKey, Period, UserAccount},
    errors::Error,
    levels::{compute_levels, PriceLevelSet},
    ports::{ChannelPlatform, PriceFeed},
    store::Accounts,
    Result,
};

/// One watch entry that produced both a window and a spot price this scan.
struct Evaluated {
    symbol: String,
    period: Period,
    levels: PriceLevelSet,
    price: f64,
}

pub struct AlertEngine {
    accounts: Arc<Accounts>,
    feed: Arc<dyn PriceFeed>,
    platform: Arc<dyn ChannelPlatform>,
}

impl AlertEngine {
    pub fn new(
        accounts: Arc<Accounts>,
        feed: Arc<dyn PriceFeed>,
        platform: Arc<dyn ChannelPlatform>,
    ) -> Self {
        Self {
            accounts,
            feed,
            platform,
        }
    }

    pub fn feed(&self) -> Arc<dyn PriceFeed> {
        self.feed.clone()
    }

    pub async fn watch(&self, user_id: &str, symbol: &str, period: Period) -> Result<PriceLevelSet> {
        self.watch_at(user_id, symbol, period, Utc::now()).await
    }

    /// Compute the level report for `(symbol, period)` and add it to the user's watch list.
    pub async fn watch_at(
        &self,
        user_id: &str,
        symbol: &str,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<PriceLevelSet> {
        if self.accounts.get(user_id)?.is_none() {
            return Err(Error::UnknownUser(user_id.to_string()));
        }

        let window = self.feed.window(symbol, period).await?;
        let levels = compute_levels(window.high, window.low, window.close);

        let _guard = self.accounts.lock(user_id).await;
        let mut account = self
            .accounts
            .get(user_id)?
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))?;
        if account.watch(symbol, period, now) {
            self.accounts.put(&account)?;
            info!(user = %user_id, %symbol, %period, "watch entry added");
        }
        Ok(levels)
    }

    pub async fn scan(&self, user_id: &str, now: DateTime<Utc>) -> Result<UserAccount> {
        self.scan_with(self.feed.as_ref(), user_id, now).await
    }

    /// Evaluate every watch entry of one user against `feed` and notify new level touches.
    ///
    /// Prices are fetched without holding the user's lock; dedup bookkeeping
    /// happens on a fresh copy of the account under the lock.
    pub async fn scan_with(
        &self,
        feed: &dyn PriceFeed,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UserAccount> {
        let snapshot = self
            .accounts
            .get(user_id)?
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))?
            .watch_list;

        let mut evaluated = Vec::with_capacity(snapshot.len());
        for entry in &snapshot {
            let window = match feed.window(&entry.symbol, entry.period).await {
                Ok(w) => w,
                Err(e) => {
                    debug!(user = %user_id, symbol = %entry.symbol, period = %entry.period, error = %e, "window unavailable; entry deferred");
                    continue;
                }
            };
            let price = match feed.spot(&entry.symbol).await {
                Ok(p) => p,
                Err(e) => {
                    debug!(user = %user_id, symbol = %entry.symbol, error = %e, "spot unavailable; entry deferred");
                    continue;
                }
            };
            evaluated.push(Evaluated {
                symbol: entry.symbol.clone(),
                period: entry.period,
                levels: compute_levels(window.high, window.low, window.close),
                price,
            });
        }

        let _guard = self.accounts.lock(user_id).await;
        let mut account = self
            .accounts
            .get(user_id)?
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))?;

        for ev in &evaluated {
            self.notify_touches(&mut account, ev).await?;
        }

        for entry in account.watch_list.iter_mut() {
            if snapshot
                .iter()
                .any(|s| s.symbol == entry.symbol && s.period == entry.period)
            {
                entry.last_processed_at = now;
            }
        }
        self.accounts.put(&account)?;
        Ok(account)
    }

    async fn notify_touches(&self, account: &mut UserAccount, ev: &Evaluated) -> Result<()> {
        let Some(chat) = account.chat_id() else {
            warn!(user = %account.id, "account id is not a chat id; alerts cannot be delivered");
            return Ok(());
        };

        for level in ev.levels.candidates() {
            let key = AlertKey::new(&ev.symbol, ev.period, level);
            if account.notified_levels.contains(&key) || !ev.levels.touches(ev.price, level) {
                continue;
            }

            let text = alert_text(&ev.symbol, key.level(), ev.price);
            match self.platform.send_text(chat, &text).await {
                Ok(()) => {
                    info!(user = %account.id, key = %key, price = ev.price, "level alert sent");
                    account.notified_levels.insert(key);
                    self.accounts.put(account)?;
                }
                Err(e) => {
                    let e = Error::DeliveryFailed(e.to_string());
                    warn!(user = %account.id, key = %key, error = %e, "level alert not delivered; will retry next cycle");
                }
            }
        }
        Ok(())
    }
}

fn alert_text(symbol: &str, level: f64, price: f64) -> String {
    format!("⚠️ {symbol} has reached the key level {level:.2}.\nCurrent price: {price:.2}")
}
