//! Subscription source backed by a spreadsheet web app.
//!
//! `GET <url>?phone=<phone>` answers with the subscription row and
//! `POST <url>` appends or updates one. Entitlement flags travel as one
//! column per flag holding `"T"` or `"F"`.

use std::{collections::BTreeSet, time::Duration};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use sgb_core::{
    errors::Error,
    ports::{Lookup, SubscriptionPush, SubscriptionRecord, SubscriptionSource},
    Result,
};

#[derive(Clone, Debug)]
pub struct SheetsClient {
    url: String,
    flags: Vec<String>,
    http: reqwest::Client,
}

impl SheetsClient {
    /// `flags` are the entitlement columns to read and write.
    pub fn new(url: impl Into<String>, flags: Vec<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("sheets http client: {e}")))?;
        Ok(Self {
            url: url.into(),
            flags,
            http,
        })
    }
}

#[async_trait]
impl SubscriptionSource for SheetsClient {
    async fn lookup(&self, phone: &str) -> Result<Lookup> {
        let resp = self
            .http
            .get(&self.url)
            .query(&[("phone", phone)])
            .send()
            .await
            .map_err(|e| Error::External(format!("sheets request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "sheets lookup failed: {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("sheets json error: {e}")))?;

        let lookup = parse_lookup(&body, &self.flags, Utc::now().date_naive())?;
        debug!(%phone, found = matches!(lookup, Lookup::Found(_)), "sheets lookup");
        Ok(lookup)
    }

    async fn push(&self, update: &SubscriptionPush) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .json(&push_body(update))
            .send()
            .await
            .map_err(|e| Error::External(format!("sheets request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "sheets push failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }
}

fn parse_lookup(body: &Value, flags: &[String], today: NaiveDate) -> Result<Lookup> {
    let obj = body
        .as_object()
        .ok_or_else(|| Error::External("sheets response is not an object".to_string()))?;

    match obj.get("status").and_then(Value::as_str) {
        Some("found") => {}
        Some("not_found") => return Ok(Lookup::NotFound),
        other => {
            return Err(Error::External(format!(
                "unexpected sheets status: {}",
                other.unwrap_or("<missing>")
            )))
        }
    }

    let days_left = obj.get("days_left").and_then(as_u32);
    let days = obj.get("days").and_then(as_u32).or(days_left).unwrap_or(0);
    let start_date = obj
        .get("start_date")
        .and_then(Value::as_str)
        .and_then(parse_date)
        .or_else(|| {
            // Rows without a start carry the remaining days instead.
            let left = days_left?;
            let used = i64::from(days.saturating_sub(left));
            Some(today - chrono::Duration::days(used))
        });

    let entitlements = flags
        .iter()
        .filter(|f| obj.get(f.as_str()).is_some_and(is_true))
        .cloned()
        .collect::<BTreeSet<_>>();

    Ok(Lookup::Found(SubscriptionRecord {
        days,
        start_date,
        entitlements,
    }))
}

fn push_body(update: &SubscriptionPush) -> Value {
    let mut body = Map::new();
    body.insert("action".into(), update.action.as_str().into());
    body.insert("phone".into(), update.phone.clone().into());
    body.insert("name".into(), update.name.clone().into());
    body.insert("days".into(), update.days.into());
    body.insert(
        "start_date".into(),
        update
            .start_date
            .map(|d| d.to_string())
            .unwrap_or_default()
            .into(),
    );
    body.insert("days_left".into(), update.days_left.into());
    for (flag, on) in &update.flags {
        let mark = if *on { "T" } else { "F" };
        body.insert(flag.clone(), mark.into());
    }
    Value::Object(body)
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u32),
        _ => None,
    }
}

/// `YYYY-MM-DD`, optionally followed by a time part.
fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()
}

fn is_true(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("t") || s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sgb_core::ports::PushAction;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn flags() -> Vec<String> {
        vec!["Hotline".to_string(), "CIP".to_string()]
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_found_row_with_start_date() {
        let body = json!({
            "status": "found",
            "days": "30",
            "start_date": "2026-04-01T00:00:00.000Z",
            "days_left": 12,
            "Hotline": "T",
            "CIP": "F",
        });
        let Lookup::Found(rec) = parse_lookup(&body, &flags(), d(2026, 4, 19)).unwrap() else {
            panic!("expected found");
        };
        assert_eq!(rec.days, 30);
        assert_eq!(rec.start_date, Some(d(2026, 4, 1)));
        assert_eq!(rec.entitlements.len(), 1);
        assert!(rec.entitlements.contains("Hotline"));
    }

    #[test]
    fn derives_start_from_days_left() {
        let body = json!({ "status": "found", "days": 30, "days_left": 10, "CIP": "T" });
        let Lookup::Found(rec) = parse_lookup(&body, &flags(), d(2026, 4, 21)).unwrap() else {
            panic!("expected found");
        };
        assert_eq!(rec.start_date, Some(d(2026, 4, 1)));

        let body = json!({ "status": "found", "days_left": 5 });
        let Lookup::Found(rec) = parse_lookup(&body, &flags(), d(2026, 4, 21)).unwrap() else {
            panic!("expected found");
        };
        assert_eq!(rec.days, 5);
        assert_eq!(rec.start_date, Some(d(2026, 4, 21)));
        assert!(rec.entitlements.is_empty());
    }

    #[test]
    fn rejects_unexpected_bodies() {
        assert_eq!(
            parse_lookup(&json!({"status": "not_found"}), &flags(), d(2026, 1, 1)).unwrap(),
            Lookup::NotFound
        );
        assert!(parse_lookup(&json!({"status": "boom"}), &flags(), d(2026, 1, 1)).is_err());
        assert!(parse_lookup(&json!([1, 2]), &flags(), d(2026, 1, 1)).is_err());
    }

    #[tokio::test]
    async fn lookup_queries_by_phone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/exec"))
            .and(query_param("phone", "9121234567"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "found",
                "days": 30,
                "start_date": "2026-04-01",
                "Hotline": "T",
                "CIP": "T",
            })))
            .mount(&server)
            .await;

        let client = SheetsClient::new(
            format!("{}/exec", server.uri()),
            flags(),
            Duration::from_secs(5),
        )
        .unwrap();
        let Lookup::Found(rec) = client.lookup("9121234567").await.unwrap() else {
            panic!("expected found");
        };
        assert_eq!(rec.entitlements.len(), 2);
    }

    #[tokio::test]
    async fn server_errors_are_external() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("quota"))
            .mount(&server)
            .await;

        let client = SheetsClient::new(server.uri(), flags(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.lookup("9121234567").await,
            Err(Error::External(_))
        ));
        let push = SubscriptionPush {
            action: PushAction::Register,
            phone: "9121234567".to_string(),
            name: String::new(),
            days: 0,
            start_date: None,
            days_left: 0,
            flags: vec![],
        };
        let err = client.push(&push).await.unwrap_err();
        assert!(err.to_string().contains("quota"));
    }

    #[tokio::test]
    async fn push_sends_flag_columns() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "action": "register",
                "phone": "9121234567",
                "name": "Sara",
                "start_date": "2026-04-01",
                "Hotline": "T",
                "CIP": "F",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = SheetsClient::new(server.uri(), flags(), Duration::from_secs(5)).unwrap();
        let push = SubscriptionPush {
            action: PushAction::Register,
            phone: "9121234567".to_string(),
            name: "Sara".to_string(),
            days: 30,
            start_date: Some(d(2026, 4, 1)),
            days_left: 30,
            flags: vec![("Hotline".to_string(), true), ("CIP".to_string(), false)],
        };
        client.push(&push).await.unwrap();
    }
}
