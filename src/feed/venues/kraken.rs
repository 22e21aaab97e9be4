//! Kraken adapter - v2 websocket trade stream plus public OHLC REST
//!
//! Kraken contributes trade events only on the stream path; official bars
//! come from the REST OHLC endpoint during backfill.

use chrono::DateTime;
use serde::Deserialize;

use crate::error::{FeedError, FeedResult};
use crate::feed::adapter::{VenueAdapter, VenueMessage};
use crate::types::{Asset, Candle, Interval, Side, TradeEvent, VenueId};

const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";
const KRAKEN_REST_MIRRORS: &[&str] = &["https://api.kraken.com"];

#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    channel: Option<String>,
    method: Option<String>,
    success: Option<bool>,
    data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct WsTrade {
    symbol: String,
    side: String,
    price: f64,
    qty: f64,
    timestamp: String,
}

pub struct KrakenAdapter;

impl KrakenAdapter {
    /// REST pair spelling differs from the websocket symbol
    fn rest_pair(asset: Asset) -> &'static str {
        match asset {
            Asset::BTC => "XBTUSD",
            Asset::ETH => "ETHUSD",
            Asset::SOL => "SOLUSD",
            Asset::XRP => "XRPUSD",
        }
    }

    fn interval_minutes(interval: Interval) -> Option<i64> {
        match interval {
            Interval::Min1 => Some(1),
            Interval::Min5 => Some(5),
            Interval::Min15 => Some(15),
            Interval::Hour1 => Some(60),
            Interval::Sec15 => None,
        }
    }
}

impl VenueAdapter for KrakenAdapter {
    fn id(&self) -> VenueId {
        VenueId::Kraken
    }

    fn symbol(&self, asset: Asset) -> Option<String> {
        Some(format!("{}/USD", asset))
    }

    fn native_intervals(&self) -> &'static [Interval] {
        &[Interval::Min1, Interval::Min5, Interval::Min15, Interval::Hour1]
    }

    fn ws_url(&self) -> String {
        KRAKEN_WS_URL.to_string()
    }

    fn subscribe_payloads(&self, symbol: &str, _interval: Interval) -> FeedResult<Vec<String>> {
        Ok(vec![serde_json::json!({
            "method": "subscribe",
            "params": { "channel": "trade", "symbol": [symbol] },
        })
        .to_string()])
    }

    fn parse_message(&self, asset: Asset, text: &str) -> FeedResult<Vec<VenueMessage>> {
        let envelope: Envelope = serde_json::from_str(text)?;

        if envelope.method.is_some() || envelope.success.is_some() {
            return Ok(vec![VenueMessage::Ack]);
        }
        let data = match (envelope.channel.as_deref(), envelope.data) {
            (Some("trade"), Some(data)) => data,
            (Some(_), _) => return Ok(vec![VenueMessage::Ignore]),
            _ => return Ok(vec![VenueMessage::Ignore]),
        };
        let expected = self.symbol(asset).unwrap_or_default();

        let trades: Vec<WsTrade> = serde_json::from_value(data)?;
        let mut out = Vec::with_capacity(trades.len());
        for trade in trades {
            if trade.symbol != expected {
                continue;
            }
            let time = DateTime::parse_from_rfc3339(&trade.timestamp)
                .map_err(|e| FeedError::Parse(format!("bad trade timestamp: {}", e)))?
                .timestamp();
            out.push(VenueMessage::Trade(TradeEvent {
                venue: self.id(),
                asset,
                time,
                price: trade.price,
                size: trade.qty,
                side: if trade.side == "buy" { Side::Buy } else { Side::Sell },
            }));
        }
        if out.is_empty() {
            out.push(VenueMessage::Ignore);
        }
        Ok(out)
    }

    fn rest_endpoints(&self) -> Vec<String> {
        KRAKEN_REST_MIRRORS.iter().map(|s| s.to_string()).collect()
    }

    fn kline_url(
        &self,
        base: &str,
        symbol: &str,
        interval: Interval,
        start: Option<i64>,
        _limit: usize,
    ) -> String {
        // the ws symbol is not used by the REST API; map back through asset
        let pair = Asset::parse(symbol.split('/').next().unwrap_or(symbol))
            .map(Self::rest_pair)
            .unwrap_or("XBTUSD");
        let minutes = Self::interval_minutes(interval).unwrap_or(1);
        let mut url = format!("{}/0/public/OHLC?pair={}&interval={}", base, pair, minutes);
        if let Some(start) = start {
            // `since` is exclusive of the bar at that exact time
            url.push_str(&format!("&since={}", start - 1));
        }
        url
    }

    fn parse_klines(&self, body: &str) -> FeedResult<Vec<Candle>> {
        #[derive(Deserialize)]
        struct OhlcResponse {
            error: Vec<String>,
            #[serde(default)]
            result: serde_json::Map<String, serde_json::Value>,
        }

        let response: OhlcResponse = serde_json::from_str(body)?;
        if !response.error.is_empty() {
            return Err(FeedError::Parse(format!(
                "kraken OHLC error: {}",
                response.error.join(", ")
            )));
        }

        // result holds one pair-keyed row array plus a "last" cursor
        let rows = response
            .result
            .iter()
            .find(|(key, value)| key.as_str() != "last" && value.is_array())
            .and_then(|(_, value)| value.as_array())
            .ok_or_else(|| FeedError::Parse("kraken OHLC result missing pair rows".into()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let row = row
                .as_array()
                .ok_or_else(|| FeedError::Parse("kraken OHLC row not an array".into()))?;
            if row.len() < 7 {
                return Err(FeedError::Parse("kraken OHLC row too short".into()));
            }
            let num = |v: &serde_json::Value| -> FeedResult<f64> {
                v.as_str()
                    .and_then(|s| s.parse::<f64>().ok())
                    .or_else(|| v.as_f64())
                    .ok_or_else(|| FeedError::Parse("kraken OHLC field not numeric".into()))
            };
            candles.push(Candle {
                time: row[0]
                    .as_i64()
                    .ok_or_else(|| FeedError::Parse("kraken OHLC time not an integer".into()))?,
                open: num(&row[1])?,
                high: num(&row[2])?,
                low: num(&row[3])?,
                close: num(&row[4])?,
                // row[5] is vwap; volume is the next field
                volume: num(&row[6])?,
            });
        }
        Ok(candles)
    }

    fn max_batch(&self) -> usize {
        720
    }
}
