//! Historical backfill - paginated REST klines with mirror failover
//!
//! Fetches seed history for a venue feed before streaming begins. Failure is
//! surfaced only after every configured mirror endpoint has been tried;
//! streaming never waits on, or is blocked by, this path.

use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::bucket::rebucket;
use crate::error::{FeedError, FeedResult};
use crate::feed::adapter::VenueAdapter;
use crate::types::{Asset, Candle, Interval};

pub struct HistoricalFetcher {
    client: reqwest::Client,
}

impl HistoricalFetcher {
    pub fn new(request_timeout: Duration) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Fetch `count` candles at `interval`, oldest first, deduplicated.
    ///
    /// When the venue has no native support for `interval`, its finest
    /// supported interval is fetched with a scaled count and re-bucketed.
    pub async fn fetch(
        &self,
        adapter: &dyn VenueAdapter,
        asset: Asset,
        interval: Interval,
        count: usize,
    ) -> FeedResult<Vec<Candle>> {
        let symbol = adapter.symbol(asset).ok_or_else(|| {
            FeedError::Configuration(format!(
                "venue {} does not carry asset {}",
                adapter.id(),
                asset
            ))
        })?;
        let fetch_interval = adapter.native_or_finest(interval);
        let needed = scaled_count(count, interval, fetch_interval);

        let mut last_err: Option<FeedError> = None;
        for base in adapter.rest_endpoints() {
            match self
                .fetch_pages(adapter, &base, &symbol, fetch_interval, needed)
                .await
            {
                Ok(raw) => {
                    let mut candles = raw;
                    if fetch_interval != interval {
                        candles = rebucket(&candles, interval);
                    }
                    if candles.len() > count {
                        candles.drain(..candles.len() - count);
                    }
                    tracing::info!(
                        venue = %adapter.id(),
                        asset = %asset,
                        interval = %interval,
                        bars = candles.len(),
                        "Historical candles fetched"
                    );
                    return Ok(candles);
                }
                Err(e) => {
                    tracing::warn!(
                        venue = %adapter.id(),
                        endpoint = %base,
                        error = %e,
                        "Mirror failed, trying next"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(FeedError::UpstreamUnavailable {
            venue: adapter.id(),
            detail: last_err.map_or_else(|| "no mirrors configured".into(), |e| e.to_string()),
        })
    }

    async fn fetch_pages(
        &self,
        adapter: &dyn VenueAdapter,
        base: &str,
        symbol: &str,
        interval: Interval,
        needed: usize,
    ) -> FeedResult<Vec<Candle>> {
        let start = Utc::now().timestamp() - needed as i64 * interval.secs();
        collect_pages(
            needed,
            adapter.max_batch(),
            Some(interval.align(start)),
            interval,
            |cursor, limit| {
                let url = adapter.kline_url(base, symbol, interval, cursor, limit);
                let client = self.client.clone();
                async move {
                    let body = client
                        .get(&url)
                        .send()
                        .await?
                        .error_for_status()?
                        .text()
                        .await?;
                    adapter.parse_klines(&body)
                }
            },
        )
        .await
    }
}

/// Drive the start-time cursor across sequential pages, deduplicating by
/// timestamp as batches land (last write wins), ascending output.
///
/// Stops on a short batch (end of available history) or once the unique
/// total meets `needed`. Overlapping batches are expected and collapse into
/// single bars rather than duplicates.
async fn collect_pages<F, Fut>(
    needed: usize,
    max_batch: usize,
    mut cursor: Option<i64>,
    interval: Interval,
    mut page: F,
) -> FeedResult<Vec<Candle>>
where
    F: FnMut(Option<i64>, usize) -> Fut,
    Fut: Future<Output = FeedResult<Vec<Candle>>>,
{
    let mut by_time: BTreeMap<i64, Candle> = BTreeMap::new();
    while by_time.len() < needed {
        let batch = page(cursor, max_batch).await?;
        let got = batch.len();
        // venues ship pages in either order
        let newest = batch.iter().map(|c| c.time).max();
        for candle in batch {
            by_time.insert(candle.time, candle);
        }
        if got < max_batch {
            break;
        }
        // advance to just after the last received bar
        cursor = newest.map(|t| t + interval.secs());
    }
    Ok(by_time.into_values().collect())
}

/// Bars to request at `fetched` granularity to cover `count` target bars
fn scaled_count(count: usize, target: Interval, fetched: Interval) -> usize {
    ((count as i64 * target.secs() + fetched.secs() - 1) / fetched.secs()).max(1) as usize
}
