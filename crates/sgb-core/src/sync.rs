//! Reconciliation of local accounts against the external subscription source.
//!
//! The source is authoritative; the local store is a cache that keeps serving
//! last-known values while the source is unreachable.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    domain::{normalize_phone, UserAccount},
    errors::Error,
    ports::{Lookup, PushAction, SubscriptionPush, SubscriptionSource},
    store::Accounts,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Source knew the phone; local terms now mirror it.
    Refreshed,
    /// Source did not know the phone; a registration push was queued.
    Unregistered,
    /// Source unreachable; last-known local terms kept.
    Stale,
}

// ============== Background registration ==============

/// Pushes local state to the source off the request path, with bounded retries.
#[derive(Clone)]
pub struct Registrar {
    source: Arc<dyn SubscriptionSource>,
    attempts: u32,
    backoff: Duration,
}

impl Registrar {
    pub fn new(source: Arc<dyn SubscriptionSource>, attempts: u32, backoff: Duration) -> Self {
        Self {
            source,
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Spawn the push. The handle resolves to whether any attempt succeeded.
    pub fn submit(&self, push: SubscriptionPush) -> JoinHandle<bool> {
        let source = self.source.clone();
        let attempts = self.attempts;
        let backoff = self.backoff;
        tokio::spawn(async move {
            for attempt in 1..=attempts {
                match source.push(&push).await {
                    Ok(()) => {
                        info!(phone = %push.phone, action = push.action.as_str(), "registration pushed");
                        return true;
                    }
                    Err(e) => {
                        warn!(phone = %push.phone, attempt, error = %e, "registration push failed");
                        if attempt < attempts {
                            let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                            tokio::time::sleep(backoff.saturating_mul(factor)).await;
                        }
                    }
                }
            }
            error!(phone = %push.phone, attempts, "giving up on registration push");
            false
        })
    }
}

// ============== Sync engine ==============

pub struct SyncEngine {
    source: Arc<dyn SubscriptionSource>,
    accounts: Arc<Accounts>,
    registrar: Registrar,
    flags: Vec<String>,
    timeout: Duration,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn SubscriptionSource>,
        accounts: Arc<Accounts>,
        registrar: Registrar,
        flags: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            accounts,
            registrar,
            flags,
            timeout,
        }
    }

    pub fn accounts(&self) -> &Arc<Accounts> {
        &self.accounts
    }

    /// Reconcile `account` with the source and persist it.
    ///
    /// The caller must hold the account's lock. Source failures degrade to
    /// [`SyncOutcome::Stale`]; only a store failure is returned as an error.
    pub async fn sync(&self, account: &mut UserAccount, today: NaiveDate) -> Result<SyncOutcome> {
        let looked = tokio::time::timeout(self.timeout, self.source.lookup(&account.phone)).await;

        let outcome = match looked {
            Ok(Ok(Lookup::Found(record))) => {
                account.entitlements = record.entitlements;
                account.subscription_days = record.days;
                account.subscription_start = record.start_date;
                SyncOutcome::Refreshed
            }
            Ok(Ok(Lookup::NotFound)) => {
                debug!(user = %account.id, "phone unknown to subscription source; registering");
                let _ = self.registrar.submit(self.push_for(account));
                SyncOutcome::Unregistered
            }
            Ok(Err(e)) => {
                let e = Error::SyncUnavailable(e.to_string());
                warn!(user = %account.id, error = %e, "serving cached subscription");
                SyncOutcome::Stale
            }
            Err(_) => {
                let e = Error::SyncUnavailable(format!("lookup timed out after {:?}", self.timeout));
                warn!(user = %account.id, error = %e, "serving cached subscription");
                SyncOutcome::Stale
            }
        };

        account.refresh_days_left(today);
        self.accounts.put(account)?;
        Ok(outcome)
    }

    /// Lock, load and sync one account by id.
    pub async fn refresh(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<(UserAccount, SyncOutcome)> {
        let _guard = self.accounts.lock(user_id).await;
        let mut account = self
            .accounts
            .get(user_id)?
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))?;
        let outcome = self.sync(&mut account, today).await?;
        Ok((account, outcome))
    }

    /// Create or update an account from a shared contact, then sync it.
    pub async fn enroll(
        &self,
        user_id: &str,
        name: &str,
        raw_phone: &str,
        now: DateTime<Utc>,
    ) -> Result<(UserAccount, SyncOutcome)> {
        let phone = normalize_phone(raw_phone)?;

        let _guard = self.accounts.lock(user_id).await;
        let mut account = self
            .accounts
            .get(user_id)?
            .unwrap_or_else(|| UserAccount::new(user_id, phone.clone(), now));
        account.phone = phone;
        if !name.trim().is_empty() {
            account.name = name.trim().to_string();
        }
        info!(user = %user_id, phone = %account.phone, "contact enrolled");

        let outcome = self.sync(&mut account, now.date_naive()).await?;
        Ok((account, outcome))
    }

    fn push_for(&self, account: &UserAccount) -> SubscriptionPush {
        SubscriptionPush {
            action: PushAction::Register,
            phone: account.phone.clone(),
            name: account.name.clone(),
            days: account.subscription_days,
            start_date: account.subscription_start,
            days_left: account.days_left,
            flags: self
                .flags
                .iter()
                .map(|f| (f.clone(), account.is_entitled(f)))
                .collect(),
        }
    }
}
