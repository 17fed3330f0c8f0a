//! Background loops: price-level alerts and subscription expiry.
//!
//! - The alert loop waits a short warm-up, then scans every active account
//!   once per interval through a fresh per-cycle price cache.
//! - The expiry loop runs `RenewalReminder::remind` for every account on a
//!   longer interval.
//! - Both loops check the shutdown token only between cycles, so a cycle that
//!   has started always runs to completion.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    alerts::AlertEngine,
    config::Config,
    feed::CycleCache,
    renewal::{ReminderOutcome, RenewalReminder},
    store::Accounts,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Scheduler {
    accounts: Arc<Accounts>,
    alerts: Arc<AlertEngine>,
    renewal: Arc<RenewalReminder>,
    alert_warmup: Duration,
    alert_interval: Duration,
    expiry_interval: Duration,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        accounts: Arc<Accounts>,
        alerts: Arc<AlertEngine>,
        renewal: Arc<RenewalReminder>,
        cfg: &Config,
    ) -> Self {
        Self {
            accounts,
            alerts,
            renewal,
            alert_warmup: cfg.alert_warmup,
            alert_interval: cfg.alert_interval,
            expiry_interval: cfg.expiry_check_interval,
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn both loops. Calling it twice starts nothing new.
    pub async fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }

        let this = self.clone();
        handles.push(tokio::spawn(async move { this.alert_loop().await }));
        let this = self.clone();
        handles.push(tokio::spawn(async move { this.expiry_loop().await }));

        info!(
            alert_interval = ?self.alert_interval,
            expiry_interval = ?self.expiry_interval,
            "scheduler started"
        );
    }

    /// Signal both loops to stop and wait for in-flight cycles to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler task ended abnormally");
            }
        }
        info!("scheduler stopped");
    }

    async fn alert_loop(self: Arc<Self>) {
        if self.pause(self.alert_warmup).await {
            return;
        }
        loop {
            let stats = self.run_alert_cycle(Utc::now()).await;
            debug!(?stats, "alert cycle finished");
            if self.pause(self.alert_interval).await {
                return;
            }
        }
    }

    async fn expiry_loop(self: Arc<Self>) {
        if self.pause(self.alert_warmup).await {
            return;
        }
        loop {
            let stats = self.run_expiry_cycle(Utc::now()).await;
            debug!(?stats, "expiry cycle finished");
            if self.pause(self.expiry_interval).await {
                return;
            }
        }
    }

    /// Sleep for `d`; true when shutdown was requested meanwhile.
    async fn pause(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = sleep(d) => false,
        }
    }

    /// One pass of the alert loop over every account.
    pub async fn run_alert_cycle(&self, now: DateTime<Utc>) -> CycleStats {
        let mut stats = CycleStats::default();
        let ids = match self.accounts.ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "alert cycle: cannot list accounts");
                return stats;
            }
        };

        let cache = CycleCache::new(self.alerts.feed());
        let today = now.date_naive();
        for id in ids {
            let active = match self.accounts.get(&id) {
                Ok(Some(acc)) => !acc.watch_list.is_empty() && acc.days_left_on(today) > 0,
                Ok(None) => false,
                Err(e) => {
                    error!(user = %id, error = %e, "alert cycle: cannot load account");
                    stats.failed += 1;
                    continue;
                }
            };
            if !active {
                stats.skipped += 1;
                continue;
            }

            match self.alerts.scan_with(&cache, &id, now).await {
                Ok(_) => stats.processed += 1,
                Err(e) => {
                    error!(user = %id, error = %e, "alert scan failed");
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// One pass of the expiry loop over every account.
    pub async fn run_expiry_cycle(&self, now: DateTime<Utc>) -> CycleStats {
        let mut stats = CycleStats::default();
        let ids = match self.accounts.ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "expiry cycle: cannot list accounts");
                return stats;
            }
        };

        for id in ids {
            match self.renewal.remind(&id, now).await {
                Ok(ReminderOutcome::Idle) => stats.skipped += 1,
                Ok(ReminderOutcome::Failed) => stats.failed += 1,
                Ok(_) => stats.processed += 1,
                Err(e) => {
                    error!(user = %id, error = %e, "expiry check failed");
                    stats.failed += 1;
                }
            }
        }
        stats
    }
}
