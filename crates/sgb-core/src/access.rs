//! Channel access: invite issuance and join-request adjudication.
//!
//! Every decision is taken on freshly synced state under the user's lock. A
//! join request is re-checked when it arrives, so an entitlement revoked after
//! the link was issued still results in a decline.

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{error, info, warn};

use crate::{
    config::Config,
    domain::{
        ChatId, Channel, InviteToken, IssuedInvite, JoinDecision, JoinRequest, UserAccount, UserId,
    },
    errors::Error,
    ports::ChannelPlatform,
    sync::{SyncEngine, SyncOutcome},
    Result,
};

/// Telegram caps invite link names at 32 characters.
const INVITE_NAME_MAX: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionStatus {
    pub entitlements: BTreeSet<String>,
    pub days_left: u32,
    pub expires_on: Option<NaiveDate>,
    pub links_left_today: u32,
    /// The source could not be reached; values are the last known ones.
    pub stale: bool,
}

impl SubscriptionStatus {
    pub fn is_active(&self) -> bool {
        self.days_left > 0 && !self.entitlements.is_empty()
    }
}

pub struct AccessGate {
    sync: Arc<SyncEngine>,
    platform: Arc<dyn ChannelPlatform>,
    channels: Vec<Channel>,
    max_links_per_day: u32,
    link_ttl: chrono::Duration,
}

impl AccessGate {
    pub fn new(sync: Arc<SyncEngine>, platform: Arc<dyn ChannelPlatform>, cfg: &Config) -> Self {
        let link_ttl = chrono::Duration::from_std(cfg.link_expire)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        Self {
            sync,
            platform,
            channels: cfg.channels.clone(),
            max_links_per_day: cfg.max_links_per_day,
            link_ttl,
        }
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Channel by entitlement flag (case-insensitive).
    pub fn channel(&self, flag: &str) -> Option<&Channel> {
        let flag = flag.trim();
        self.channels
            .iter()
            .find(|c| c.flag.eq_ignore_ascii_case(flag))
    }

    pub fn channel_for_chat(&self, chat_id: ChatId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.chat_id == chat_id)
    }

    pub async fn request_invite(&self, user_id: &str, flag: &str) -> Result<InviteToken> {
        self.request_invite_at(user_id, flag, Utc::now()).await
    }

    /// Issue a single-use, join-request-gated invite for `flag`'s channel.
    pub async fn request_invite_at(
        &self,
        user_id: &str,
        flag: &str,
        now: DateTime<Utc>,
    ) -> Result<InviteToken> {
        let channel = self
            .channel(flag)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("unknown channel: {flag}")))?;
        let today = now.date_naive();

        let accounts = self.sync.accounts();
        let _guard = accounts.lock(user_id).await;
        let mut account = accounts
            .get(user_id)?
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))?;

        self.sync.sync(&mut account, today).await?;

        if !account.may_enter(&channel.flag) {
            info!(user = %user_id, channel = %channel.flag, days_left = account.days_left, "invite refused: not entitled");
            return Err(Error::NotEntitled {
                channel: channel.flag,
            });
        }

        if account.links_issued_on(today) >= self.max_links_per_day {
            info!(user = %user_id, channel = %channel.flag, "invite refused: daily limit reached");
            return Err(Error::RateLimitExceeded {
                limit: self.max_links_per_day,
            });
        }

        let expires_at = now + self.link_ttl;
        let name = invite_name(&channel.flag, user_id);
        let url = self
            .platform
            .create_invite(channel.chat_id, expires_at, &name)
            .await
            .map_err(|e| {
                warn!(user = %user_id, channel = %channel.flag, error = %e, "invite creation failed");
                Error::InviteCreationFailed(e.to_string())
            })?;

        account.record_invite(
            today,
            IssuedInvite {
                channel: channel.flag.clone(),
                url: url.clone(),
                issued_at: now,
                expires_at,
            },
        );
        accounts.put(&account)?;

        info!(
            user = %user_id,
            channel = %channel.flag,
            issued_today = account.links_issued_on(today),
            "invite issued"
        );

        Ok(InviteToken {
            channel: channel.flag,
            url,
            expires_at,
            join_request_gated: true,
        })
    }

    pub async fn adjudicate_join_request(&self, user_id: UserId, chat_id: ChatId) -> JoinDecision {
        self.adjudicate_join_request_at(user_id, chat_id, Utc::now().date_naive())
            .await
    }

    /// Approve iff the refreshed account holds the channel's flag and has days left.
    ///
    /// Declines are explained to the user from a spawned task.
    pub async fn adjudicate_join_request_at(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        today: NaiveDate,
    ) -> JoinDecision {
        let Some(channel) = self.channel_for_chat(chat_id).cloned() else {
            warn!(user = user_id.0, chat = chat_id.0, "join request for an ungated chat");
            return JoinDecision::Decline;
        };

        let id = user_id.0.to_string();
        let accounts = self.sync.accounts();
        let _guard = accounts.lock(&id).await;

        let mut account = match accounts.get(&id) {
            Ok(Some(acc)) => acc,
            Ok(None) => {
                info!(user = %id, channel = %channel.flag, "join declined: unknown user");
                self.notify_decline(user_id, None, &channel);
                return JoinDecision::Decline;
            }
            Err(e) => {
                error!(user = %id, error = %e, "join declined: store read failed");
                return JoinDecision::Decline;
            }
        };

        if let Err(e) = self.sync.sync(&mut account, today).await {
            error!(user = %id, error = %e, "join declined: store write failed");
            return JoinDecision::Decline;
        }

        if account.may_enter(&channel.flag) {
            info!(user = %id, channel = %channel.flag, "join approved");
            JoinDecision::Approve
        } else {
            info!(user = %id, channel = %channel.flag, days_left = account.days_left, "join declined");
            self.notify_decline(user_id, Some(&account), &channel);
            JoinDecision::Decline
        }
    }

    /// Adjudicate, apply the decision on the platform, then revoke the link used.
    pub async fn settle_join_request(&self, req: &JoinRequest) -> Result<JoinDecision> {
        let decision = self
            .adjudicate_join_request(req.user_id, req.chat_id)
            .await;

        let applied = match decision {
            JoinDecision::Approve => {
                self.platform
                    .approve_join_request(req.chat_id, req.user_id)
                    .await
            }
            JoinDecision::Decline => {
                self.platform
                    .decline_join_request(req.chat_id, req.user_id)
                    .await
            }
        };

        // The link is spent whether or not the platform accepted the decision.
        if let Some(url) = &req.invite_link {
            if let Err(e) = self.platform.revoke_invite(req.chat_id, url).await {
                warn!(chat = req.chat_id.0, error = %e, "failed to revoke used invite");
            }
        }

        applied?;
        Ok(decision)
    }

    pub async fn subscription_status(&self, user_id: &str) -> Result<SubscriptionStatus> {
        self.subscription_status_at(user_id, Utc::now().date_naive())
            .await
    }

    pub async fn subscription_status_at(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<SubscriptionStatus> {
        let (account, outcome) = self.sync.refresh(user_id, today).await?;
        Ok(self.status_of(&account, outcome, today))
    }

    /// Status report for an account that was just synced.
    pub fn status_of(
        &self,
        account: &UserAccount,
        outcome: SyncOutcome,
        today: NaiveDate,
    ) -> SubscriptionStatus {
        SubscriptionStatus {
            entitlements: account.entitlements.clone(),
            days_left: account.days_left,
            expires_on: account.expires_on(),
            links_left_today: self
                .max_links_per_day
                .saturating_sub(account.links_issued_on(today)),
            stale: outcome == SyncOutcome::Stale,
        }
    }

    fn notify_decline(&self, user_id: UserId, account: Option<&UserAccount>, channel: &Channel) {
        let text = match account {
            Some(acc) if acc.is_entitled(&channel.flag) => format!(
                "⚠️ Your {} subscription has expired, so the join request was declined. Please renew to get a new link.",
                channel.flag
            ),
            _ => "⚠️ This invite link is not valid for your account, so the join request was declined."
                .to_string(),
        };
        let platform = self.platform.clone();
        tokio::spawn(async move {
            if let Err(e) = platform.send_text(ChatId(user_id.0), &text).await {
                warn!(user = user_id.0, error = %e, "failed to send decline notice");
            }
        });
    }
}

fn invite_name(flag: &str, user_id: &str) -> String {
    format!("{flag}-{user_id}")
        .chars()
        .take(INVITE_NAME_MAX)
        .collect()
}
