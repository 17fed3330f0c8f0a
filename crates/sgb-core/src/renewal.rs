//! Renewal reminders and removal of expired members.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    domain::{Channel, UserAccount, UserId},
    errors::Error,
    ports::ChannelPlatform,
    sync::{SyncEngine, SyncOutcome},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReminderOutcome {
    /// Nothing due for this account.
    Idle,
    Warned,
    Removed,
    /// Something was due but the platform call failed; retried next tick.
    Failed,
}

pub struct RenewalReminder {
    sync: Arc<SyncEngine>,
    platform: Arc<dyn ChannelPlatform>,
    channels: Vec<Channel>,
    alert_days: u32,
    cooldown: chrono::Duration,
    support_id: String,
}

impl RenewalReminder {
    pub fn new(sync: Arc<SyncEngine>, platform: Arc<dyn ChannelPlatform>, cfg: &Config) -> Self {
        let cooldown = chrono::Duration::from_std(cfg.expiry_warning_cooldown)
            .unwrap_or_else(|_| chrono::Duration::hours(3));
        Self {
            sync,
            platform,
            channels: cfg.channels.clone(),
            alert_days: cfg.alert_days,
            cooldown,
            support_id: cfg.support_id.clone(),
        }
    }

    /// Warn an account that is about to expire, or remove one that has expired.
    ///
    /// Warnings work on locally recomputed `days_left`. An account that looks
    /// expired is synced first and only removed when the source confirms it.
    pub async fn remind(&self, user_id: &str, now: DateTime<Utc>) -> Result<ReminderOutcome> {
        let accounts = self.sync.accounts();
        let _guard = accounts.lock(user_id).await;
        let mut account = accounts
            .get(user_id)?
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))?;

        let today = now.date_naive();
        account.refresh_days_left(today);

        let mut synced = None;
        if account.days_left == 0 {
            synced = Some(self.sync.sync(&mut account, today).await?);
        }

        let outcome = if account.days_left == 0 {
            match synced {
                Some(SyncOutcome::Refreshed) => self.remove_expired(&mut account, today).await,
                other => {
                    debug!(user = %account.id, outcome = ?other, "expiry not confirmed by source; keeping member");
                    ReminderOutcome::Idle
                }
            }
        } else if account.days_left <= self.alert_days && self.warning_due(&account, now) {
            self.warn_expiring(&mut account, now).await
        } else {
            ReminderOutcome::Idle
        };

        accounts.put(&account)?;
        Ok(outcome)
    }

    fn warning_due(&self, account: &UserAccount, now: DateTime<Utc>) -> bool {
        account
            .last_expiry_warning_at
            .map_or(true, |last| now - last >= self.cooldown)
    }

    async fn warn_expiring(&self, account: &mut UserAccount, now: DateTime<Utc>) -> ReminderOutcome {
        let Some(chat) = account.chat_id() else {
            return ReminderOutcome::Idle;
        };
        let expires = account
            .expires_on()
            .map(|d| d.to_string())
            .unwrap_or_default();
        let text = format!(
            "⏳ Your subscription ends in {} day(s) ({}). Contact {} to renew.",
            account.days_left, expires, self.support_id
        );
        match self.platform.send_text(chat, &text).await {
            Ok(()) => {
                account.last_expiry_warning_at = Some(now);
                info!(user = %account.id, days_left = account.days_left, "renewal reminder sent");
                ReminderOutcome::Warned
            }
            Err(e) => {
                warn!(user = %account.id, error = %e, "renewal reminder not delivered");
                ReminderOutcome::Failed
            }
        }
    }

    async fn remove_expired(&self, account: &mut UserAccount, today: NaiveDate) -> ReminderOutcome {
        let Some(expired_on) = account.expires_on() else {
            // Never had a subscription, so never let in.
            return ReminderOutcome::Idle;
        };
        if account.revoked_on.is_some_and(|d| d >= expired_on) {
            return ReminderOutcome::Idle;
        }
        let Some(chat) = account.chat_id() else {
            return ReminderOutcome::Idle;
        };
        let user = UserId(chat.0);

        let mut all_ok = true;
        for channel in &self.channels {
            if let Err(e) = self.platform.remove_member(channel.chat_id, user).await {
                warn!(user = %account.id, channel = %channel.flag, error = %e, "failed to remove expired member");
                all_ok = false;
            }
        }
        if !all_ok {
            return ReminderOutcome::Failed;
        }

        account.revoked_on = Some(today);
        info!(user = %account.id, %expired_on, "expired member removed from channels");
        ReminderOutcome::Removed
    }
}
