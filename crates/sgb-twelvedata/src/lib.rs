//! TwelveData price feed adapter.
//!
//! Daily candles come from `time_series`, spot prices from `price`. Error
//! bodies (`{"status": "error", ...}`) are failures even with a 200 status.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use sgb_core::{
    domain::Period,
    errors::Error,
    ports::{Candle, PriceFeed, PriceWindow},
    Result,
};

pub const DEFAULT_BASE_URL: &str = "https://api.twelvedata.com";

#[derive(Clone, Debug)]
pub struct TwelveDataClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    values: Vec<RawCandle>,
}

/// Fields stay loose so one bad row cannot fail the whole series.
#[derive(Debug, Deserialize)]
struct RawCandle {
    #[serde(default)]
    high: Option<Value>,
    #[serde(default)]
    low: Option<Value>,
    #[serde(default)]
    close: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SpotPrice {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    price: Option<Value>,
}

impl TwelveDataClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("twelvedata http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        })
    }

    /// Window ending on `today` and reaching back the period's length.
    pub async fn window_at(
        &self,
        symbol: &str,
        period: Period,
        today: NaiveDate,
    ) -> Result<PriceWindow> {
        let (start, end) = window_range(period, today);
        let start = start.to_string();
        let end = end.to_string();
        let resp = self
            .http
            .get(format!("{}/time_series", self.base_url))
            .query(&[
                ("symbol", symbol),
                ("interval", "1day"),
                ("start_date", start.as_str()),
                ("end_date", end.as_str()),
                ("order", "ASC"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::External(format!("twelvedata request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "twelvedata time_series failed: {}",
                resp.status()
            )));
        }

        let series: TimeSeries = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("twelvedata json error: {e}")))?;
        if series.status.as_deref() == Some("error") {
            return Err(Error::External(format!(
                "twelvedata error: {}",
                series.message.unwrap_or_default()
            )));
        }

        let candles: Vec<Candle> = series.values.iter().filter_map(parse_candle).collect();
        debug!(%symbol, %period, candles = candles.len(), "time series fetched");
        PriceWindow::from_candles(&candles)
            .ok_or_else(|| Error::External(format!("no candles for {symbol} over {period}")))
    }
}

#[async_trait]
impl PriceFeed for TwelveDataClient {
    async fn window(&self, symbol: &str, period: Period) -> Result<PriceWindow> {
        self.window_at(symbol, period, Utc::now().date_naive()).await
    }

    async fn spot(&self, symbol: &str) -> Result<f64> {
        let resp = self
            .http
            .get(format!("{}/price", self.base_url))
            .query(&[("symbol", symbol), ("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| Error::External(format!("twelvedata request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "twelvedata price failed: {}",
                resp.status()
            )));
        }

        let body: SpotPrice = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("twelvedata json error: {e}")))?;
        if body.status.as_deref() == Some("error") {
            return Err(Error::External(format!(
                "twelvedata error: {}",
                body.message.unwrap_or_default()
            )));
        }

        number(body.price.as_ref())
            .ok_or_else(|| Error::External(format!("no price for {symbol}")))
    }
}

fn window_range(period: Period, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    (today - chrono::Duration::days(period.days()), today)
}

/// Malformed rows are dropped rather than failing the whole window.
fn parse_candle(raw: &RawCandle) -> Option<Candle> {
    Some(Candle {
        high: number(raw.high.as_ref())?,
        low: number(raw.low.as_ref())?,
        close: number(raw.close.as_ref())?,
    })
}

/// TwelveData quotes numbers as strings; plain JSON numbers are accepted too.
fn number(v: Option<&Value>) -> Option<f64> {
    let n = match v? {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}
