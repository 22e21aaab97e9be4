//! Live candle stream - reconciles trade events with official bar confirmations
//!
//! Trade events give sub-second O/H/L/C latency but unreliable volume; venue
//! bar confirmations give authoritative OHLCV but arrive once per interval.
//! The stream merges both into one in-progress candle plus a finalized
//! history.

use std::collections::VecDeque;

use crate::types::{Candle, Interval, Side, TradeEvent};

/// In-progress candle with order-flow detail
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveCandle {
    pub candle: Candle,
    /// Volume traded at the ask, accumulated from trade events
    pub buy_volume: f64,
    /// Volume traded at the bid, accumulated from trade events
    pub sell_volume: f64,
    /// Whether any trade advanced this bucket (guards the confirmation rule)
    had_trades: bool,
}

impl LiveCandle {
    fn from_trade(time: i64, event: &TradeEvent) -> Self {
        let mut live = Self {
            candle: Candle::from_price(time, event.price),
            buy_volume: 0.0,
            sell_volume: 0.0,
            had_trades: true,
        };
        live.record_flow(event);
        live
    }

    fn from_confirmation(bar: Candle) -> Self {
        Self {
            candle: bar,
            buy_volume: 0.0,
            sell_volume: 0.0,
            had_trades: false,
        }
    }

    fn record_flow(&mut self, event: &TradeEvent) {
        match event.side {
            Side::Buy => self.buy_volume += event.size,
            Side::Sell => self.sell_volume += event.size,
        }
    }

    fn close(self) -> ClosedBar {
        ClosedBar {
            candle: self.candle,
            buy_volume: self.buy_volume,
            sell_volume: self.sell_volume,
        }
    }
}

/// Finalized candle pushed to history
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosedBar {
    pub candle: Candle,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

/// Per-symbol live candle builder over two update channels
pub struct CandleStream {
    interval: Interval,
    current: Option<LiveCandle>,
    history: VecDeque<ClosedBar>,
    max_history: usize,
}

impl CandleStream {
    pub fn new(interval: Interval, max_history: usize) -> Self {
        Self {
            interval,
            current: None,
            history: VecDeque::new(),
            max_history,
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// The in-progress candle
    pub fn current(&self) -> Option<&LiveCandle> {
        self.current.as_ref()
    }

    /// Finalized candles, oldest first
    pub fn history(&self) -> impl Iterator<Item = &ClosedBar> {
        self.history.iter()
    }

    /// Fold a trade event in: O/H/L/C of the matching bucket advance
    /// immediately; a strictly newer bucket finalizes the current candle.
    ///
    /// Volume is left to confirmations; trades only feed the buy/sell split.
    pub fn on_trade(&mut self, event: &TradeEvent) -> Option<ClosedBar> {
        let bucket_time = self.interval.align(event.time);

        match &mut self.current {
            Some(live) if bucket_time == live.candle.time => {
                live.candle.apply_price(event.price);
                live.record_flow(event);
                live.had_trades = true;
                None
            }
            Some(live) if bucket_time < live.candle.time => None,
            _ => {
                let closed = self.current.take().map(LiveCandle::close);
                self.current = Some(LiveCandle::from_trade(bucket_time, event));
                closed.map(|bar| self.push_history(bar))
            }
        }
    }

    /// Fold an official bar confirmation in.
    ///
    /// For the bucket trades already advanced, only volume is overwritten
    /// (the authoritative count) and O/H/L/C stay untouched. A bucket that
    /// saw no trades is seeded from the confirmation's full OHLCV.
    pub fn on_bar(&mut self, bar: &Candle) -> Option<ClosedBar> {
        let bucket_time = self.interval.align(bar.time);
        let confirmed = Candle {
            time: bucket_time,
            ..*bar
        };

        match &mut self.current {
            Some(live) if bucket_time == live.candle.time => {
                if live.had_trades {
                    live.candle.volume = confirmed.volume;
                } else {
                    live.candle = confirmed;
                }
                None
            }
            Some(live) if bucket_time < live.candle.time => None,
            _ => {
                let closed = self.current.take().map(LiveCandle::close);
                self.current = Some(LiveCandle::from_confirmation(confirmed));
                closed.map(|b| self.push_history(b))
            }
        }
    }

    /// Seed history from backfilled candles (ascending order expected).
    ///
    /// Only candles strictly older than anything already present are taken,
    /// so a late-arriving backfill never disturbs live buckets.
    pub fn seed_history(&mut self, candles: &[Candle]) {
        let cutoff = self
            .history
            .front()
            .map(|b| b.candle.time)
            .or_else(|| self.current.as_ref().map(|l| l.candle.time))
            .unwrap_or(i64::MAX);
        for candle in candles.iter().rev().filter(|c| c.time < cutoff) {
            if self.history.len() >= self.max_history {
                break;
            }
            self.history.push_front(ClosedBar {
                candle: *candle,
                buy_volume: 0.0,
                sell_volume: 0.0,
            });
        }
    }

    /// Finalize the in-progress candle (teardown)
    pub fn finalize(&mut self) -> Option<ClosedBar> {
        self.current
            .take()
            .map(LiveCandle::close)
            .map(|bar| self.push_history(bar))
    }

    fn push_history(&mut self, bar: ClosedBar) -> ClosedBar {
        self.history.push_back(bar);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, VenueId};

    fn trade(time: i64, price: f64, size: f64, side: Side) -> TradeEvent {
        TradeEvent {
            venue: VenueId::Binance,
            asset: Asset::BTC,
            time,
            price,
            size,
            side,
        }
    }

    fn bar(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn trades_advance_ohlc_immediately() {
        let mut cs = CandleStream::new(Interval::Min1, 16);
        cs.on_trade(&trade(60, 100.0, 1.0, Side::Buy));
        cs.on_trade(&trade(70, 103.0, 0.5, Side::Buy));
        cs.on_trade(&trade(80, 98.0, 2.0, Side::Sell));

        let live = cs.current().unwrap();
        assert_eq!(live.candle.open, 100.0);
        assert_eq!(live.candle.high, 103.0);
        assert_eq!(live.candle.low, 98.0);
        assert_eq!(live.candle.close, 98.0);
        assert_eq!(live.buy_volume, 1.5);
        assert_eq!(live.sell_volume, 2.0);
        // volume waits for the official confirmation
        assert_eq!(live.candle.volume, 0.0);
    }

    #[test]
    fn confirmation_overwrites_volume_without_regressing_ohlc() {
        let mut cs = CandleStream::new(Interval::Min1, 16);
        cs.on_trade(&trade(60, 100.0, 1.0, Side::Buy));
        cs.on_trade(&trade(70, 105.0, 1.0, Side::Buy));

        // official bar with narrower range must not pull high/low/close back
        cs.on_bar(&bar(60, 100.0, 102.0, 99.5, 101.0, 42.0));

        let live = cs.current().unwrap();
        assert_eq!(live.candle.volume, 42.0);
        assert_eq!(live.candle.high, 105.0);
        assert_eq!(live.candle.close, 105.0);
        assert_eq!(live.candle.open, 100.0);
    }

    #[test]
    fn newer_trade_finalizes_and_seeds_from_price() {
        let mut cs = CandleStream::new(Interval::Min1, 16);
        cs.on_trade(&trade(60, 100.0, 1.0, Side::Buy));
        let closed = cs.on_trade(&trade(125, 101.0, 0.3, Side::Sell)).unwrap();

        assert_eq!(closed.candle.time, 60);
        assert_eq!(closed.candle.close, 100.0);

        let live = cs.current().unwrap();
        assert_eq!(live.candle.time, 120);
        assert_eq!(live.candle.open, 101.0);
        assert_eq!(live.candle.high, 101.0);
        assert_eq!(live.candle.low, 101.0);
        assert_eq!(live.candle.volume, 0.0);
        assert_eq!(live.sell_volume, 0.3);
    }

    #[test]
    fn tradeless_bucket_is_seeded_from_confirmation() {
        let mut cs = CandleStream::new(Interval::Min1, 16);
        cs.on_trade(&trade(60, 100.0, 1.0, Side::Buy));

        let confirmation = bar(120, 100.5, 101.0, 99.0, 100.2, 17.0);
        let closed = cs.on_bar(&confirmation).unwrap();
        assert_eq!(closed.candle.time, 60);

        let live = cs.current().unwrap();
        assert_eq!(live.candle, confirmation);

        // later trades in the same bucket still advance O/H/L/C
        cs.on_trade(&trade(130, 102.0, 0.1, Side::Buy));
        let live = cs.current().unwrap();
        assert_eq!(live.candle.high, 102.0);
        assert_eq!(live.candle.open, 100.5);
    }

    #[test]
    fn late_events_never_mutate_state() {
        let mut cs = CandleStream::new(Interval::Min1, 16);
        cs.on_trade(&trade(120, 100.0, 1.0, Side::Buy));
        let before = *cs.current().unwrap();

        assert!(cs.on_trade(&trade(59, 999.0, 9.0, Side::Buy)).is_none());
        assert!(cs.on_bar(&bar(60, 1.0, 2.0, 0.5, 1.5, 3.0)).is_none());
        assert_eq!(*cs.current().unwrap(), before);
    }

    #[test]
    fn history_is_bounded_and_ascending() {
        let mut cs = CandleStream::new(Interval::Min1, 3);
        for i in 0..6 {
            cs.on_trade(&trade(60 * i, 100.0 + i as f64, 1.0, Side::Buy));
        }
        let times: Vec<i64> = cs.history().map(|b| b.candle.time).collect();
        assert_eq!(times.len(), 3);
        assert_eq!(times, vec![120, 180, 240]);
    }
}
