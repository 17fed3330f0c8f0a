//! Plain-text replies shown to users.

use chrono::{DateTime, Utc};

use sgb_core::{
    access::SubscriptionStatus,
    domain::{Channel, InviteToken, Period, ASSETS},
    levels::PriceLevelSet,
};

/// Rungs of each ladder shown in a report; alerts still cover the full ladder.
const REPORT_RUNGS: usize = 5;

/// Resolve a user-typed instrument (menu label or feed symbol, any case).
pub fn resolve_asset(query: &str) -> Option<(&'static str, &'static str)> {
    let q = query.trim();
    ASSETS
        .iter()
        .copied()
        .find(|(label, symbol)| label.eq_ignore_ascii_case(q) || symbol.eq_ignore_ascii_case(q))
}

pub fn welcome() -> String {
    "👋 Welcome!\n\nShare your phone number with the button below so we can find your subscription."
        .to_string()
}

pub fn help(channels: &[Channel]) -> String {
    let flags = channels
        .iter()
        .map(|c| c.flag.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Commands:\n\
         /subscription - show your subscription\n\
         /join <channel> - get an invite link ({flags})\n\
         /analysis <asset> <period> - key levels and alerts\n\
         /assets - list assets and periods\n\
         /support - contact support"
    )
}

pub fn status(s: &SubscriptionStatus, today: chrono::NaiveDate) -> String {
    if !s.is_active() {
        let mut out = "❌ You have no active subscription.".to_string();
        if s.stale {
            out.push_str("\n(The subscription service is unreachable; showing saved data.)");
        }
        return out;
    }

    let channels = s
        .entitlements
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = format!("✅ Active subscription: {channels}\n⏳ {} day(s) left", s.days_left);
    if let Some(exp) = s.expires_on {
        out.push_str(&format!(" (until {exp})"));
    }
    out.push_str(&format!(
        "\n🔗 Invite links left today ({today}): {}",
        s.links_left_today
    ));
    if s.stale {
        out.push_str("\n(The subscription service is unreachable; showing saved data.)");
    }
    out
}

pub fn invite(token: &InviteToken, now: DateTime<Utc>) -> String {
    let minutes = (token.expires_at - now).num_minutes().max(1);
    format!(
        "🔑 Your {} invite link (valid for {minutes} minute(s), single use):\n{}\n\nTap it and send a join request; it is approved automatically.",
        token.channel, token.url
    )
}

pub fn assets() -> String {
    let mut out = String::from("📊 Assets:\n");
    for (label, symbol) in ASSETS {
        out.push_str(&format!("• {label} ({symbol})\n"));
    }
    out.push_str("\nPeriods: ");
    out.push_str(
        &Period::ALL
            .iter()
            .map(|p| format!("{} ({})", p.code(), p.label()))
            .collect::<Vec<_>>()
            .join(", "),
    );
    out.push_str("\n\nExample: /analysis XAU/USD 1w");
    out
}

pub fn levels(label: &str, symbol: &str, period: Period, lv: &PriceLevelSet) -> String {
    let mut out = format!(
        "📊 {label} ({symbol}), {}\n\nHigh: {:.2}\nLow: {:.2}\nClose: {:.2}\n\n",
        period.label(),
        lv.high,
        lv.low,
        lv.close
    );
    for (i, m) in lv.mids.iter().enumerate() {
        out.push_str(&format!("M{}: {m:.2}\n", i + 1));
    }
    out.push_str(&format!("Z1: {:.2}\nPip: {:.2}\n\n", lv.z1, lv.pip));

    out.push_str("Resistance:\n");
    for (i, u) in lv.up.iter().take(REPORT_RUNGS).enumerate() {
        out.push_str(&format!("U{}: {u:.2}\n", i + 1));
    }
    out.push_str("Support:\n");
    for (i, d) in lv.down.iter().take(REPORT_RUNGS).enumerate() {
        out.push_str(&format!("D{}: {d:.2}\n", i + 1));
    }
    out.push_str("\n🔔 You will be alerted when price reaches one of these levels.");
    out
}

pub fn support(support_id: &str) -> String {
    format!("🛟 Support: {support_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgb_core::levels::compute_levels;
    use std::collections::BTreeSet;

    #[test]
    fn resolves_labels_and_symbols() {
        assert_eq!(resolve_asset("gold ounce"), Some(("Gold ounce", "XAU/USD")));
        assert_eq!(resolve_asset("xau/usd"), Some(("Gold ounce", "XAU/USD")));
        assert_eq!(resolve_asset("NAS100"), Some(("NAS100", "NASDAQ")));
        assert_eq!(resolve_asset("BTC"), None);
    }

    #[test]
    fn level_report_lists_reference_values() {
        let lv = compute_levels(1800.0, 1750.0, 1775.0);
        let txt = levels("Gold ounce", "XAU/USD", Period::Week, &lv);
        assert!(txt.contains("M4: 1793.75"));
        assert!(txt.contains("Pip: 6.25"));
        assert!(txt.contains("U1: 1806.25"));
        assert!(txt.contains("D1: 1743.75"));
        assert!(txt.contains("D5:"));
        assert!(!txt.contains("D6:"));
    }

    #[test]
    fn status_mentions_staleness_and_expiry() {
        let today = chrono::NaiveDate::from_ymd_opt(2026, 4, 11).unwrap();
        let s = SubscriptionStatus {
            entitlements: BTreeSet::from(["Hotline".to_string()]),
            days_left: 20,
            expires_on: chrono::NaiveDate::from_ymd_opt(2026, 5, 1),
            links_left_today: 4,
            stale: true,
        };
        let txt = status(&s, today);
        assert!(txt.contains("Hotline"));
        assert!(txt.contains("20 day(s)"));
        assert!(txt.contains("2026-05-01"));
        assert!(txt.contains("unreachable"));

        let expired = SubscriptionStatus {
            days_left: 0,
            stale: false,
            ..s
        };
        assert!(status(&expired, today).contains("no active"));
    }
}
