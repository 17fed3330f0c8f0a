use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell};

use crate::{
    domain::Period,
    errors::Error,
    ports::{PriceFeed, PriceWindow},
    Result,
};

type Slot<T> = Arc<OnceCell<std::result::Result<T, String>>>;

/// `PriceFeed` decorator that memoizes every answer for the lifetime of one
/// alert cycle, so a window or a spot price is fetched at most once even when
/// many users watch the same instrument.
///
/// Failures are memoized too: a symbol that failed once is skipped for the
/// rest of the cycle.
pub struct CycleCache {
    inner: Arc<dyn PriceFeed>,
    windows: Mutex<HashMap<(String, Period), Slot<PriceWindow>>>,
    spots: Mutex<HashMap<String, Slot<f64>>>,
}

impl CycleCache {
    pub fn new(inner: Arc<dyn PriceFeed>) -> Self {
        Self {
            inner,
            windows: Mutex::new(HashMap::new()),
            spots: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PriceFeed for CycleCache {
    async fn window(&self, symbol: &str, period: Period) -> Result<PriceWindow> {
        let slot = {
            let mut map = self.windows.lock().await;
            map.entry((symbol.to_string(), period))
                .or_default()
                .clone()
        };
        let res = slot
            .get_or_init(|| async {
                self.inner
                    .window(symbol, period)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;
        res.clone().map_err(Error::External)
    }

    async fn spot(&self, symbol: &str) -> Result<f64> {
        let slot = {
            let mut map = self.spots.lock().await;
            map.entry(symbol.to_string()).or_default().clone()
        };
        let res = slot
            .get_or_init(|| async { self.inner.spot(symbol).await.map_err(|e| e.to_string()) })
            .await;
        res.clone().map_err(Error::External)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFeed;

    #[tokio::test]
    async fn fetches_each_key_once_per_cycle() {
        let feed = Arc::new(FakeFeed::default());
        feed.set_window("XAU/USD", Period::Week, 1800.0, 1750.0, 1775.0);
        feed.set_spot("XAU/USD", 1776.0);

        let cache = CycleCache::new(feed.clone());
        for _ in 0..3 {
            let w = cache.window("XAU/USD", Period::Week).await.unwrap();
            assert_eq!(w.high, 1800.0);
            assert_eq!(cache.spot("XAU/USD").await.unwrap(), 1776.0);
        }
        assert_eq!(feed.window_calls(), 1);
        assert_eq!(feed.spot_calls(), 1);

        // A different period is a different key.
        assert!(cache.window("XAU/USD", Period::Month).await.is_err());
        assert_eq!(feed.window_calls(), 2);
    }

    #[tokio::test]
    async fn failures_are_remembered_for_the_cycle() {
        let feed = Arc::new(FakeFeed::default());
        let cache = CycleCache::new(feed.clone());

        assert!(cache.spot("DXY").await.is_err());
        feed.set_spot("DXY", 104.2);
        assert!(cache.spot("DXY").await.is_err());
        assert_eq!(feed.spot_calls(), 1);

        // A new cycle sees the recovered feed.
        let next = CycleCache::new(feed.clone());
        assert_eq!(next.spot("DXY").await.unwrap(), 104.2);
    }
}
