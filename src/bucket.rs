//! Interval bucketing - folds ticks into boundary-aligned OHLCV buckets
//!
//! Pure, synchronous state machines: `IntervalBucketer` for tick streams and
//! `Rebucketer` for synthesizing a coarser interval out of finer candles when
//! a venue has no native support for the requested granularity.

use crate::types::{Candle, Interval};

/// Result of feeding one tick into the bucketer
#[derive(Debug, Clone, PartialEq)]
pub struct BucketUpdate {
    /// Bucket the tick landed in (aligned start time)
    pub time: i64,
    /// The tick opened a new bucket
    pub is_new_bucket: bool,
    /// Previous bucket, emitted exactly once when rolled over
    pub completed: Option<Candle>,
}

/// Folds an ordered tick sequence into interval-aligned OHLCV buckets
///
/// Emitted buckets are strictly increasing in time; out-of-order ticks are
/// discarded, never merged.
#[derive(Debug, Clone)]
pub struct IntervalBucketer {
    interval: Interval,
    current: Option<Candle>,
}

impl IntervalBucketer {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval,
            current: None,
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// The in-progress bucket, if any tick has been observed
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Fold one tick in. Returns `None` for late ticks (bucket older than the
    /// open one), which never mutate state.
    pub fn observe(&mut self, time: i64, price: f64, size: f64) -> Option<BucketUpdate> {
        let bucket_time = self.interval.align(time);

        match &mut self.current {
            Some(current) if bucket_time == current.time => {
                current.apply_price(price);
                current.volume += size;
                Some(BucketUpdate {
                    time: bucket_time,
                    is_new_bucket: false,
                    completed: None,
                })
            }
            Some(current) if bucket_time < current.time => None,
            _ => {
                let completed = self.current.take();
                let mut opened = Candle::from_price(bucket_time, price);
                opened.volume = size;
                self.current = Some(opened);
                Some(BucketUpdate {
                    time: bucket_time,
                    is_new_bucket: true,
                    completed,
                })
            }
        }
    }

    /// Take the in-progress bucket (e.g. on teardown)
    pub fn flush(&mut self) -> Option<Candle> {
        self.current.take()
    }
}

/// Aggregates finer-interval candles upward into a coarser interval
///
/// Open comes from the first folded candle, high/low widen, close tracks the
/// last, volume sums; the coarser aligned start is authoritative.
#[derive(Debug, Clone)]
pub struct Rebucketer {
    interval: Interval,
    current: Option<Candle>,
}

impl Rebucketer {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval,
            current: None,
        }
    }

    /// Fold one finer candle in, emitting the previous coarse bucket on
    /// rollover. Late candles are discarded.
    pub fn fold(&mut self, candle: &Candle) -> Option<Candle> {
        let bucket_time = self.interval.align(candle.time);

        match &mut self.current {
            Some(current) if bucket_time == current.time => {
                current.high = current.high.max(candle.high);
                current.low = current.low.min(candle.low);
                current.close = candle.close;
                current.volume += candle.volume;
                None
            }
            Some(current) if bucket_time < current.time => None,
            _ => {
                let completed = self.current.take();
                self.current = Some(Candle {
                    time: bucket_time,
                    ..*candle
                });
                completed
            }
        }
    }

    /// Take the trailing, possibly partial, coarse bucket
    pub fn flush(&mut self) -> Option<Candle> {
        self.current.take()
    }
}

/// Re-bucket a whole ascending candle slice, trailing partial included
pub fn rebucket(candles: &[Candle], target: Interval) -> Vec<Candle> {
    let mut rb = Rebucketer::new(target);
    let mut out = Vec::new();
    for candle in candles {
        if let Some(done) = rb.fold(candle) {
            out.push(done);
        }
    }
    out.extend(rb.flush());
    out
}
