//! Binance spot adapter - aggregated trades, kline confirmations, REST klines

use serde::Deserialize;

use crate::error::{FeedError, FeedResult};
use crate::feed::adapter::{ms_to_secs, parse_price, VenueAdapter, VenueMessage};
use crate::types::{Asset, Candle, Interval, Side, TradeEvent, VenueId};

const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";
const BINANCE_REST_MIRRORS: &[&str] = &[
    "https://api.binance.com",
    "https://api1.binance.com",
    "https://api2.binance.com",
    "https://api3.binance.com",
];

#[derive(Debug, Clone, Deserialize)]
struct AggTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    qty: String,
    #[serde(rename = "T")]
    trade_time: i64,
    /// Buyer is maker: the aggressor sold
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct KlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: Kline,
}

#[derive(Debug, Clone, Deserialize)]
struct Kline {
    #[serde(rename = "t")]
    start_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    /// Candle is closed
    #[serde(rename = "x")]
    closed: bool,
}

pub struct BinanceAdapter;

impl BinanceAdapter {
    fn interval_code(interval: Interval) -> Option<&'static str> {
        match interval {
            Interval::Min1 => Some("1m"),
            Interval::Min5 => Some("5m"),
            Interval::Min15 => Some("15m"),
            Interval::Hour1 => Some("1h"),
            Interval::Sec15 => None,
        }
    }
}

impl VenueAdapter for BinanceAdapter {
    fn id(&self) -> VenueId {
        VenueId::Binance
    }

    fn symbol(&self, asset: Asset) -> Option<String> {
        Some(format!("{}USDT", asset))
    }

    fn native_intervals(&self) -> &'static [Interval] {
        &[Interval::Min1, Interval::Min5, Interval::Min15, Interval::Hour1]
    }

    fn ws_url(&self) -> String {
        BINANCE_WS_URL.to_string()
    }

    fn subscribe_payloads(&self, symbol: &str, interval: Interval) -> FeedResult<Vec<String>> {
        let streamed = self.native_or_finest(interval);
        let code = Self::interval_code(streamed).ok_or_else(|| {
            FeedError::Configuration(format!("binance cannot stream interval {}", streamed))
        })?;
        let pair = symbol.to_lowercase();
        Ok(vec![serde_json::json!({
            "method": "SUBSCRIBE",
            "params": [
                format!("{}@aggTrade", pair),
                format!("{}@kline_{}", pair, code),
            ],
            "id": 1,
        })
        .to_string()])
    }

    fn parse_message(&self, asset: Asset, text: &str) -> FeedResult<Vec<VenueMessage>> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        // subscription ack: {"result":null,"id":1}
        if value.get("id").is_some() {
            return Ok(vec![VenueMessage::Ack]);
        }

        let expected = self.symbol(asset).unwrap_or_default();
        match value.get("e").and_then(|e| e.as_str()) {
            Some("aggTrade") => {
                let trade: AggTrade = serde_json::from_value(value)?;
                if trade.symbol != expected {
                    return Ok(vec![VenueMessage::Ignore]);
                }
                Ok(vec![VenueMessage::Trade(TradeEvent {
                    venue: self.id(),
                    asset,
                    time: ms_to_secs(trade.trade_time),
                    price: parse_price(&trade.price)?,
                    size: parse_price(&trade.qty)?,
                    side: if trade.buyer_is_maker { Side::Sell } else { Side::Buy },
                })])
            }
            Some("kline") => {
                let event: KlineEvent = serde_json::from_value(value)?;
                if event.symbol != expected || !event.kline.closed {
                    return Ok(vec![VenueMessage::Ignore]);
                }
                let k = event.kline;
                Ok(vec![VenueMessage::Bar(Candle {
                    time: ms_to_secs(k.start_time),
                    open: parse_price(&k.open)?,
                    high: parse_price(&k.high)?,
                    low: parse_price(&k.low)?,
                    close: parse_price(&k.close)?,
                    volume: parse_price(&k.volume)?,
                })])
            }
            _ => Ok(vec![VenueMessage::Ignore]),
        }
    }

    fn rest_endpoints(&self) -> Vec<String> {
        BINANCE_REST_MIRRORS.iter().map(|s| s.to_string()).collect()
    }

    fn kline_url(
        &self,
        base: &str,
        symbol: &str,
        interval: Interval,
        start: Option<i64>,
        limit: usize,
    ) -> String {
        let code = Self::interval_code(interval).unwrap_or("1m");
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            base, symbol, code, limit
        );
        if let Some(start) = start {
            url.push_str(&format!("&startTime={}", start * 1000));
        }
        url
    }

    fn parse_klines(&self, body: &str) -> FeedResult<Vec<Candle>> {
        // array of arrays: [open_time, open, high, low, close, volume, ...]
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() < 6 {
                return Err(FeedError::Parse("kline row too short".into()));
            }
            let field = |i: usize| -> FeedResult<f64> {
                row[i]
                    .as_str()
                    .ok_or_else(|| FeedError::Parse(format!("kline field {} not a string", i)))
                    .and_then(parse_price)
            };
            candles.push(Candle {
                time: ms_to_secs(row[0].as_i64().ok_or_else(|| {
                    FeedError::Parse("kline open_time not an integer".into())
                })?),
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: field(5)?,
            });
        }
        Ok(candles)
    }

    fn max_batch(&self) -> usize {
        1000
    }
}
