//! Venue adapter trait - the seam between shared feed machinery and
//! venue-owned wire protocols
//!
//! Every venue message shape is polymorphic over one capability: it yields a
//! price and an event time. Adapters are pure protocol knowledge (subscribe
//! payloads, frame parsing, REST query shapes); transport, lifecycle, and
//! reconnect policy live in the feed machinery.

use crate::error::FeedResult;
use crate::types::{Asset, Candle, Interval, TradeEvent, VenueId};

/// One parsed inbound frame, normalized
#[derive(Debug, Clone)]
pub enum VenueMessage {
    /// Trade execution carrying price, event time, size, and side
    Trade(TradeEvent),
    /// Closed official bar for the venue's streamed interval
    Bar(Candle),
    /// Subscription ack / control frame, no data
    Ack,
    /// Recognized but irrelevant (other symbol, heartbeat, book noise)
    Ignore,
}

/// Venue-specific protocol knowledge
pub trait VenueAdapter: Send + Sync {
    fn id(&self) -> VenueId;

    /// Venue-local symbol spelling; `None` when the venue does not carry the
    /// asset (the support matrix decides whether it is ever asked).
    fn symbol(&self, asset: Asset) -> Option<String>;

    /// Intervals the venue supports natively (stream and REST)
    fn native_intervals(&self) -> &'static [Interval];

    /// Websocket endpoint
    fn ws_url(&self) -> String;

    /// Subscription payloads sent once the socket is open
    fn subscribe_payloads(&self, symbol: &str, interval: Interval) -> FeedResult<Vec<String>>;

    /// Application-level heartbeat payload, if the venue requires one
    fn heartbeat_payload(&self) -> Option<String> {
        None
    }

    /// Parse one inbound text frame into zero or more normalized messages.
    /// Errors here drop the single frame, never the connection.
    fn parse_message(&self, asset: Asset, text: &str) -> FeedResult<Vec<VenueMessage>>;

    /// REST mirror base endpoints, tried in order until one works
    fn rest_endpoints(&self) -> Vec<String>;

    /// Kline page request URL. `start` is Unix seconds; `limit` is bars.
    fn kline_url(
        &self,
        base: &str,
        symbol: &str,
        interval: Interval,
        start: Option<i64>,
        limit: usize,
    ) -> String;

    /// Parse a kline REST body into candles (any order; caller sorts)
    fn parse_klines(&self, body: &str) -> FeedResult<Vec<Candle>>;

    /// Venue's per-request bar maximum
    fn max_batch(&self) -> usize;

    /// Interval actually streamed/fetched for a target: the target itself
    /// when native, else the venue's finest supported interval, re-bucketed
    /// client-side by the caller.
    fn native_or_finest(&self, target: Interval) -> Interval {
        if self.native_intervals().contains(&target) {
            return target;
        }
        self.native_intervals()
            .iter()
            .copied()
            .min_by_key(|i| i.secs())
            .unwrap_or(target)
    }
}

/// Parse a decimal string field the way venue APIs ship numbers
pub fn parse_price(s: &str) -> FeedResult<f64> {
    s.parse::<f64>()
        .map_err(|e| crate::error::FeedError::Parse(format!("bad decimal '{}': {}", s, e)))
}

/// Milliseconds-to-seconds floor used by venues with ms event times
pub fn ms_to_secs(ms: i64) -> i64 {
    ms.div_euclid(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_floor_handles_sub_second_times() {
        assert_eq!(ms_to_secs(1_700_000_000_999), 1_700_000_000);
        assert_eq!(ms_to_secs(1_700_000_000_000), 1_700_000_000);
    }
}
