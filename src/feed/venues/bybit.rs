//! Bybit V5 spot adapter - public trades, kline confirmations, REST klines

use serde::Deserialize;

use crate::error::{FeedError, FeedResult};
use crate::feed::adapter::{ms_to_secs, parse_price, VenueAdapter, VenueMessage};
use crate::types::{Asset, Candle, Interval, Side, TradeEvent, VenueId};

const BYBIT_WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";
const BYBIT_REST_MIRRORS: &[&str] = &["https://api.bybit.com", "https://api.bytick.com"];

#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    topic: Option<String>,
    op: Option<String>,
    success: Option<bool>,
    data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct PublicTrade {
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "v")]
    size: String,
    #[serde(rename = "p")]
    price: String,
}

#[derive(Debug, Clone, Deserialize)]
struct KlineData {
    start: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
    confirm: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct KlineRestResponse {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: KlineRestResult,
}

#[derive(Debug, Clone, Deserialize)]
struct KlineRestResult {
    /// Rows newest-first: [start_ms, open, high, low, close, volume, turnover]
    #[serde(default)]
    list: Vec<Vec<String>>,
}

pub struct BybitAdapter;

impl BybitAdapter {
    fn interval_code(interval: Interval) -> Option<&'static str> {
        match interval {
            Interval::Min1 => Some("1"),
            Interval::Min5 => Some("5"),
            Interval::Min15 => Some("15"),
            Interval::Hour1 => Some("60"),
            Interval::Sec15 => None,
        }
    }
}

impl VenueAdapter for BybitAdapter {
    fn id(&self) -> VenueId {
        VenueId::Bybit
    }

    fn symbol(&self, asset: Asset) -> Option<String> {
        Some(format!("{}USDT", asset))
    }

    fn native_intervals(&self) -> &'static [Interval] {
        &[Interval::Min1, Interval::Min5, Interval::Min15, Interval::Hour1]
    }

    fn ws_url(&self) -> String {
        BYBIT_WS_URL.to_string()
    }

    fn subscribe_payloads(&self, symbol: &str, interval: Interval) -> FeedResult<Vec<String>> {
        let streamed = self.native_or_finest(interval);
        let code = Self::interval_code(streamed).ok_or_else(|| {
            FeedError::Configuration(format!("bybit cannot stream interval {}", streamed))
        })?;
        Ok(vec![serde_json::json!({
            "op": "subscribe",
            "args": [
                format!("publicTrade.{}", symbol),
                format!("kline.{}.{}", code, symbol),
            ],
        })
        .to_string()])
    }

    fn heartbeat_payload(&self) -> Option<String> {
        Some(r#"{"op":"ping"}"#.to_string())
    }

    fn parse_message(&self, asset: Asset, text: &str) -> FeedResult<Vec<VenueMessage>> {
        let envelope: Envelope = serde_json::from_str(text)?;

        if envelope.op.as_deref() == Some("pong") || envelope.success.is_some() {
            return Ok(vec![VenueMessage::Ack]);
        }
        let (topic, data) = match (envelope.topic, envelope.data) {
            (Some(t), Some(d)) => (t, d),
            _ => return Ok(vec![VenueMessage::Ignore]),
        };
        let expected = self.symbol(asset).unwrap_or_default();

        if topic.starts_with("publicTrade.") {
            let trades: Vec<PublicTrade> = serde_json::from_value(data)?;
            let mut out = Vec::with_capacity(trades.len());
            for trade in trades {
                if trade.symbol != expected {
                    continue;
                }
                out.push(VenueMessage::Trade(TradeEvent {
                    venue: self.id(),
                    asset,
                    time: ms_to_secs(trade.trade_time),
                    price: parse_price(&trade.price)?,
                    size: parse_price(&trade.size)?,
                    side: if trade.side == "Buy" { Side::Buy } else { Side::Sell },
                }));
            }
            if out.is_empty() {
                out.push(VenueMessage::Ignore);
            }
            return Ok(out);
        }

        if topic.starts_with("kline.") && topic.ends_with(&expected) {
            let klines: Vec<KlineData> = serde_json::from_value(data)?;
            let mut out = Vec::new();
            for k in klines.into_iter().filter(|k| k.confirm) {
                out.push(VenueMessage::Bar(Candle {
                    time: ms_to_secs(k.start),
                    open: parse_price(&k.open)?,
                    high: parse_price(&k.high)?,
                    low: parse_price(&k.low)?,
                    close: parse_price(&k.close)?,
                    volume: parse_price(&k.volume)?,
                }));
            }
            if out.is_empty() {
                out.push(VenueMessage::Ignore);
            }
            return Ok(out);
        }

        Ok(vec![VenueMessage::Ignore])
    }

    fn rest_endpoints(&self) -> Vec<String> {
        BYBIT_REST_MIRRORS.iter().map(|s| s.to_string()).collect()
    }

    fn kline_url(
        &self,
        base: &str,
        symbol: &str,
        interval: Interval,
        start: Option<i64>,
        limit: usize,
    ) -> String {
        let code = Self::interval_code(interval).unwrap_or("1");
        let mut url = format!(
            "{}/v5/market/kline?category=spot&symbol={}&interval={}&limit={}",
            base, symbol, code, limit
        );
        if let Some(start) = start {
            url.push_str(&format!("&start={}", start * 1000));
        }
        url
    }

    fn parse_klines(&self, body: &str) -> FeedResult<Vec<Candle>> {
        let response: KlineRestResponse = serde_json::from_str(body)?;
        if response.ret_code != 0 {
            return Err(FeedError::Parse(format!(
                "bybit kline error {}: {}",
                response.ret_code, response.ret_msg
            )));
        }
        let mut candles = Vec::with_capacity(response.result.list.len());
        for row in response.result.list {
            if row.len() < 6 {
                return Err(FeedError::Parse("kline row too short".into()));
            }
            candles.push(Candle {
                time: ms_to_secs(
                    row[0]
                        .parse::<i64>()
                        .map_err(|e| FeedError::Parse(format!("bad start time: {}", e)))?,
                ),
                open: parse_price(&row[1])?,
                high: parse_price(&row[2])?,
                low: parse_price(&row[3])?,
                close: parse_price(&row[4])?,
                volume: parse_price(&row[5])?,
            });
        }
        Ok(candles)
    }

    fn max_batch(&self) -> usize {
        1000
    }
}
