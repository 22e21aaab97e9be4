//! Coinbase Exchange adapter - match stream plus REST candles
//!
//! The exchange websocket has no kline channel; this venue contributes trade
//! events only and relies on REST candles for backfill.

use chrono::DateTime;
use serde::Deserialize;

use crate::error::{FeedError, FeedResult};
use crate::feed::adapter::{parse_price, VenueAdapter, VenueMessage};
use crate::types::{Asset, Candle, Interval, Side, TradeEvent, VenueId};

const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
const COINBASE_REST_MIRRORS: &[&str] = &["https://api.exchange.coinbase.com"];

#[derive(Debug, Clone, Deserialize)]
struct MatchMsg {
    #[serde(rename = "type")]
    msg_type: String,
    product_id: Option<String>,
    time: Option<String>,
    price: Option<String>,
    size: Option<String>,
    /// Maker side; the aggressor took the other side
    side: Option<String>,
}

pub struct CoinbaseAdapter;

impl CoinbaseAdapter {
    fn granularity(interval: Interval) -> Option<i64> {
        match interval {
            Interval::Min1 => Some(60),
            Interval::Min5 => Some(300),
            Interval::Min15 => Some(900),
            Interval::Hour1 => Some(3600),
            Interval::Sec15 => None,
        }
    }
}

impl VenueAdapter for CoinbaseAdapter {
    fn id(&self) -> VenueId {
        VenueId::Coinbase
    }

    fn symbol(&self, asset: Asset) -> Option<String> {
        Some(format!("{}-USD", asset))
    }

    fn native_intervals(&self) -> &'static [Interval] {
        &[Interval::Min1, Interval::Min5, Interval::Min15, Interval::Hour1]
    }

    fn ws_url(&self) -> String {
        COINBASE_WS_URL.to_string()
    }

    fn subscribe_payloads(&self, symbol: &str, _interval: Interval) -> FeedResult<Vec<String>> {
        Ok(vec![serde_json::json!({
            "type": "subscribe",
            "product_ids": [symbol],
            "channels": ["matches", "heartbeat"],
        })
        .to_string()])
    }

    fn parse_message(&self, asset: Asset, text: &str) -> FeedResult<Vec<VenueMessage>> {
        let msg: MatchMsg = serde_json::from_str(text)?;

        match msg.msg_type.as_str() {
            "match" | "last_match" => {}
            "subscriptions" => return Ok(vec![VenueMessage::Ack]),
            _ => return Ok(vec![VenueMessage::Ignore]),
        }
        let expected = self.symbol(asset).unwrap_or_default();
        if msg.product_id.as_deref() != Some(expected.as_str()) {
            return Ok(vec![VenueMessage::Ignore]);
        }

        let time = msg
            .time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp())
            .ok_or_else(|| FeedError::Parse("match without a valid time".into()))?;
        let price = parse_price(
            msg.price
                .as_deref()
                .ok_or_else(|| FeedError::Parse("match without price".into()))?,
        )?;
        let size = parse_price(msg.size.as_deref().unwrap_or("0"))?;
        // maker sold means the taker bought
        let side = match msg.side.as_deref() {
            Some("sell") => Side::Buy,
            _ => Side::Sell,
        };

        Ok(vec![VenueMessage::Trade(TradeEvent {
            venue: self.id(),
            asset,
            time,
            price,
            size,
            side,
        })])
    }

    fn rest_endpoints(&self) -> Vec<String> {
        COINBASE_REST_MIRRORS.iter().map(|s| s.to_string()).collect()
    }

    fn kline_url(
        &self,
        base: &str,
        symbol: &str,
        interval: Interval,
        start: Option<i64>,
        limit: usize,
    ) -> String {
        let granularity = Self::granularity(interval).unwrap_or(60);
        let mut url = format!(
            "{}/products/{}/candles?granularity={}",
            base, symbol, granularity
        );
        if let Some(start) = start {
            let end = start + granularity * limit as i64;
            url.push_str(&format!("&start={}&end={}", start, end));
        }
        url
    }

    fn parse_klines(&self, body: &str) -> FeedResult<Vec<Candle>> {
        // rows newest-first: [time, low, high, open, close, volume]
        let rows: Vec<Vec<f64>> = serde_json::from_str(body)?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() < 6 {
                return Err(FeedError::Parse("candle row too short".into()));
            }
            candles.push(Candle {
                time: row[0] as i64,
                low: row[1],
                high: row[2],
                open: row[3],
                close: row[4],
                volume: row[5],
            });
        }
        Ok(candles)
    }

    fn max_batch(&self) -> usize {
        300
    }
}
