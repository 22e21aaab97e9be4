//! Core types used throughout PriceFuse
//!
//! Defines the shared data model for ticks, candles, venue state, and
//! composite samples.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Supported logical assets, independent of venue-specific symbol spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    SOL,
    XRP,
}

impl Default for Asset {
    fn default() -> Self {
        Asset::BTC
    }
}

impl Asset {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BTC" => Some(Asset::BTC),
            "ETH" => Some(Asset::ETH),
            "SOL" => Some(Asset::SOL),
            "XRP" => Some(Asset::XRP),
            _ => None,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::BTC => write!(f, "BTC"),
            Asset::ETH => write!(f, "ETH"),
            Asset::SOL => write!(f, "SOL"),
            Asset::XRP => write!(f, "XRP"),
        }
    }
}

/// Price venue identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VenueId {
    Binance,
    Bybit,
    Coinbase,
    Kraken,
}

impl VenueId {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Binance => "binance",
            VenueId::Bybit => "bybit",
            VenueId::Coinbase => "coinbase",
            VenueId::Kraken => "kraken",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Some(VenueId::Binance),
            "bybit" => Some(VenueId::Bybit),
            "coinbase" => Some(VenueId::Coinbase),
            "kraken" => Some(VenueId::Kraken),
            _ => None,
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Candle interval widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    Sec15,
    Min1,
    Min5,
    Min15,
    Hour1,
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Min1
    }
}

impl Interval {
    /// Width in seconds
    pub fn secs(&self) -> i64 {
        match self {
            Interval::Sec15 => 15,
            Interval::Min1 => 60,
            Interval::Min5 => 5 * 60,
            Interval::Min15 => 15 * 60,
            Interval::Hour1 => 60 * 60,
        }
    }

    /// Floor-align a Unix-seconds timestamp to this interval's boundary
    pub fn align(&self, ts: i64) -> i64 {
        ts.div_euclid(self.secs()) * self.secs()
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "15s" => Some(Interval::Sec15),
            "1m" | "1min" => Some(Interval::Min1),
            "5m" | "5min" => Some(Interval::Min5),
            "15m" | "15min" => Some(Interval::Min15),
            "1h" | "1hour" => Some(Interval::Hour1),
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Sec15 => write!(f, "15s"),
            Interval::Min1 => write!(f, "1m"),
            Interval::Min5 => write!(f, "5m"),
            Interval::Min15 => write!(f, "15m"),
            Interval::Hour1 => write!(f, "1h"),
        }
    }
}

/// Connection lifecycle of a venue feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Streaming,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Subscribed => write!(f, "subscribed"),
            ConnectionState::Streaming => write!(f, "streaming"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Trade aggressor side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Normalized price tick from a venue stream
///
/// `time` is Unix seconds, floor-aligned to the venue's native granularity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceTick {
    pub venue: VenueId,
    pub asset: Asset,
    pub time: i64,
    pub price: f64,
}

/// Trade execution event with order-flow detail
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TradeEvent {
    pub venue: VenueId,
    pub asset: Asset,
    pub time: i64,
    pub price: f64,
    pub size: f64,
    pub side: Side,
}

impl TradeEvent {
    /// Project down to the plain tick shape
    pub fn tick(&self) -> PriceTick {
        PriceTick {
            venue: self.venue,
            asset: self.asset,
            time: self.time,
            price: self.price,
        }
    }
}

/// A single point on a venue's interval-aligned price series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Unix seconds, always an exact multiple of the active interval
    pub time: i64,
    pub price: f64,
}

/// OHLCV candle aligned to an interval boundary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, Unix seconds, aligned to the interval boundary
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Open a candle from a single price observation
    pub fn from_price(time: i64, price: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    /// Fold a later price into the candle
    pub fn apply_price(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    /// `low <= open,close <= high` and non-negative volume
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= 0.0
    }
}

/// Quorum classification of a composite sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumState {
    /// Preferred quorum met; price from the full formula membership
    Ok,
    /// Minimum quorum met with fewer venues than preferred
    Degraded,
    /// Below minimum quorum; no price published
    Gap,
}

impl fmt::Display for QuorumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuorumState::Ok => write!(f, "ok"),
            QuorumState::Degraded => write!(f, "degraded"),
            QuorumState::Gap => write!(f, "gap"),
        }
    }
}

/// Why a venue was left out of the composite mean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExcludeReason {
    /// Last known price older than the freshness horizon
    Stale,
    /// Deviation from the mean beyond the configured threshold
    Outlier,
    /// Venue never reported a usable price
    NoData,
    /// Reported alongside the sample but outside the formula membership
    Auxiliary,
}

impl ExcludeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExcludeReason::Stale => "stale",
            ExcludeReason::Outlier => "outlier",
            ExcludeReason::NoData => "no_data",
            ExcludeReason::Auxiliary => "auxiliary",
        }
    }
}

impl fmt::Display for ExcludeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One aggregated, quorum-annotated price observation across venues
///
/// Immutable after creation; the composite series is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSample {
    /// Interval-aligned Unix seconds
    pub time: i64,
    /// `None` iff `quorum == Gap`
    pub price: Option<f64>,
    /// Venues whose prices entered the arithmetic mean
    pub included: Vec<VenueId>,
    /// Venues reported but not averaged, with the reason
    pub excluded: Vec<(VenueId, ExcludeReason)>,
    pub quorum: QuorumState,
}

/// Per-venue feed state, owned exclusively by its feed task
///
/// Readers only ever see point-in-time snapshots of this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueState {
    pub venue: VenueId,
    pub connection: ConnectionState,
    pub last_price: Option<f64>,
    pub last_tick_time: Option<i64>,
    /// Interval-aligned price series, oldest first, bounded
    pub history: VecDeque<PricePoint>,
}

impl VenueState {
    pub fn new(venue: VenueId) -> Self {
        Self {
            venue,
            connection: ConnectionState::Disconnected,
            last_price: None,
            last_tick_time: None,
            history: VecDeque::new(),
        }
    }

    /// Seed the series with backfilled points (ascending). Only points
    /// strictly older than anything already recorded are taken, so live data
    /// always wins.
    pub fn seed_points(&mut self, points: &[PricePoint], cap: usize) {
        let cutoff = self.history.front().map_or(i64::MAX, |p| p.time);
        for point in points.iter().rev().filter(|p| p.time < cutoff) {
            if self.history.len() >= cap {
                break;
            }
            self.history.push_front(*point);
        }
    }

    /// Append or update the aligned series point, keeping at most `cap` entries
    pub fn record_point(&mut self, point: PricePoint, cap: usize) {
        match self.history.back_mut() {
            Some(last) if last.time == point.time => last.price = point.price,
            // late point, series stays monotonic
            Some(last) if last.time > point.time => {}
            _ => {
                self.history.push_back(point);
                while self.history.len() > cap {
                    self.history.pop_front();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_align_floors_to_boundary() {
        assert_eq!(Interval::Min1.align(1_700_000_059), 1_700_000_040);
        assert_eq!(Interval::Sec15.align(1_700_000_014), 1_700_000_010);
        assert_eq!(Interval::Min15.align(1_700_000_900), 1_700_000_100);
    }

    #[test]
    fn candle_from_price_is_well_formed() {
        let mut c = Candle::from_price(60, 100.0);
        assert!(c.is_well_formed());
        c.apply_price(101.5);
        c.apply_price(99.0);
        assert_eq!(c.high, 101.5);
        assert_eq!(c.low, 99.0);
        assert_eq!(c.close, 99.0);
        assert!(c.is_well_formed());
    }

    #[test]
    fn venue_state_series_stays_monotonic() {
        let mut state = VenueState::new(VenueId::Binance);
        state.record_point(PricePoint { time: 60, price: 1.0 }, 4);
        state.record_point(PricePoint { time: 120, price: 2.0 }, 4);
        // late point is dropped
        state.record_point(PricePoint { time: 60, price: 9.0 }, 4);
        // same-bucket point updates in place
        state.record_point(PricePoint { time: 120, price: 3.0 }, 4);
        let times: Vec<i64> = state.history.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![60, 120]);
        assert_eq!(state.history.back().unwrap().price, 3.0);
    }
}
