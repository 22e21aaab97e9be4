//! Composite aggregation - quorum-gated reconciliation across venues
//!
//! Consumes read-only venue snapshots once per interval boundary and emits a
//! single `CompositeSample`. A sample is only ever one of three states: `Ok`
//! (preferred quorum met), `Degraded` (minimum quorum met), or `Gap` (no
//! trustworthy price, published as data rather than an error).

use std::collections::HashMap;

use crate::candles::ClosedBar;
use crate::config::AppConfig;
use crate::error::FeedResult;
use crate::types::{
    Asset, Candle, CompositeSample, ExcludeReason, Interval, PricePoint, QuorumState, VenueId,
    VenueState,
};

/// Fixed, auditable formula parameters for one asset
#[derive(Debug, Clone)]
pub struct CompositePolicy {
    /// Formula membership, in configured order
    pub components: Vec<VenueId>,
    /// Reported alongside samples, never averaged
    pub auxiliary: Vec<VenueId>,
    pub required_quorum: usize,
    pub min_quorum: usize,
    /// Relative deviation cut-off; None disables outlier rejection
    pub outlier_threshold: Option<f64>,
    /// Whether historical reconstruction applies the outlier rule
    pub outlier_on_backfill: bool,
    /// Carry-forward freshness horizon in seconds
    pub freshness_secs: i64,
}

impl CompositePolicy {
    pub fn from_config(cfg: &AppConfig, asset: Asset) -> FeedResult<Self> {
        Ok(Self {
            components: cfg.components(asset)?,
            auxiliary: cfg.auxiliary(asset)?,
            required_quorum: cfg.required_quorum(asset)?,
            min_quorum: cfg.composite.min_quorum,
            outlier_threshold: cfg.composite.outlier_threshold,
            outlier_on_backfill: cfg.composite.outlier_on_backfill,
            freshness_secs: cfg.composite.freshness_secs,
        })
    }
}

/// Composite OHLCV bar merged from the included venues' candles
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeBar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

pub struct CompositeAggregator {
    policy: CompositePolicy,
}

impl CompositeAggregator {
    pub fn new(policy: CompositePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CompositePolicy {
        &self.policy
    }

    /// Compute the sample at an interval boundary from venue snapshots.
    pub fn compute(&self, time: i64, snapshots: &[VenueState]) -> CompositeSample {
        let by_venue: HashMap<VenueId, &VenueState> =
            snapshots.iter().map(|s| (s.venue, s)).collect();
        self.sample_at(time, self.policy.outlier_threshold, |venue| {
            by_venue
                .get(&venue)
                .and_then(|state| last_point_at_or_before(&state.history, time))
        })
    }

    /// Rebuild composite samples over backfilled per-venue histories.
    ///
    /// Same carry-forward and quorum semantics as the live path; the outlier
    /// rule applies only when the policy opts historical data in.
    pub fn reconstruct(
        &self,
        interval: Interval,
        histories: &HashMap<VenueId, Vec<PricePoint>>,
        from: i64,
        to: i64,
    ) -> Vec<CompositeSample> {
        let threshold = if self.policy.outlier_on_backfill {
            self.policy.outlier_threshold
        } else {
            None
        };

        let mut samples = Vec::new();
        let mut t = interval.align(from);
        while t <= to {
            samples.push(self.sample_at(t, threshold, |venue| {
                histories
                    .get(&venue)
                    .and_then(|points| last_point_at_or_before(points, t))
            }));
            t += interval.secs();
        }
        samples
    }

    fn sample_at<F>(
        &self,
        time: i64,
        outlier_threshold: Option<f64>,
        lookup: F,
    ) -> CompositeSample
    where
        F: Fn(VenueId) -> Option<PricePoint>,
    {
        let mut present: Vec<(VenueId, f64)> = Vec::new();
        let mut excluded: Vec<(VenueId, ExcludeReason)> = Vec::new();

        for &venue in &self.policy.components {
            match lookup(venue) {
                Some(point) if point.price > 0.0 => {
                    if time - point.time <= self.policy.freshness_secs {
                        present.push((venue, point.price));
                    } else {
                        excluded.push((venue, ExcludeReason::Stale));
                    }
                }
                _ => excluded.push((venue, ExcludeReason::NoData)),
            }
        }
        for &venue in &self.policy.auxiliary {
            excluded.push((venue, ExcludeReason::Auxiliary));
        }

        if present.len() < self.policy.min_quorum {
            return self.gap(time, present, excluded);
        }

        if let Some(threshold) = outlier_threshold {
            let mean = mean_price(&present);
            let (kept, outliers): (Vec<_>, Vec<_>) = present
                .into_iter()
                .partition(|(_, p)| ((p - mean) / mean).abs() <= threshold);
            // one recompute only, no cascading
            excluded.extend(outliers.into_iter().map(|(v, _)| (v, ExcludeReason::Outlier)));
            present = kept;
            if present.len() < self.policy.min_quorum {
                return self.gap(time, present, excluded);
            }
        }

        let quorum = if present.len() >= self.policy.required_quorum {
            QuorumState::Ok
        } else {
            QuorumState::Degraded
        };

        CompositeSample {
            time,
            price: Some(mean_price(&present)),
            included: present.into_iter().map(|(v, _)| v).collect(),
            excluded,
            quorum,
        }
    }

    fn gap(
        &self,
        time: i64,
        present: Vec<(VenueId, f64)>,
        excluded: Vec<(VenueId, ExcludeReason)>,
    ) -> CompositeSample {
        CompositeSample {
            time,
            price: None,
            included: present.into_iter().map(|(v, _)| v).collect(),
            excluded,
            quorum: QuorumState::Gap,
        }
    }
}

/// Merge the included venues' candles into one composite OHLCV bar.
///
/// O/H/L/C are unweighted means across the included venues; volume and the
/// buy/sell split are summed. Returns `None` when the sample published no
/// price or no included venue has a candle for the bucket.
pub fn composite_bar(
    sample: &CompositeSample,
    venue_bars: &HashMap<VenueId, ClosedBar>,
) -> Option<CompositeBar> {
    sample.price?;
    let bars: Vec<&ClosedBar> = sample
        .included
        .iter()
        .filter_map(|v| venue_bars.get(v))
        .filter(|b| b.candle.time == sample.time)
        .collect();
    if bars.is_empty() {
        return None;
    }

    let n = bars.len() as f64;
    let mean = |f: fn(&Candle) -> f64| bars.iter().map(|b| f(&b.candle)).sum::<f64>() / n;
    Some(CompositeBar {
        time: sample.time,
        open: mean(|c| c.open),
        high: mean(|c| c.high),
        low: mean(|c| c.low),
        close: mean(|c| c.close),
        volume: bars.iter().map(|b| b.candle.volume).sum(),
        buy_volume: bars.iter().map(|b| b.buy_volume).sum(),
        sell_volume: bars.iter().map(|b| b.sell_volume).sum(),
    })
}

fn mean_price(present: &[(VenueId, f64)]) -> f64 {
    present.iter().map(|(_, p)| p).sum::<f64>() / present.len() as f64
}

/// Last series point at or before `time`; series is ascending.
fn last_point_at_or_before<'a, S>(points: S, time: i64) -> Option<PricePoint>
where
    S: IntoIterator<Item = &'a PricePoint>,
    S::IntoIter: DoubleEndedIterator,
{
    points.into_iter().rev().find(|p| p.time <= time).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(min: usize, required: usize, threshold: Option<f64>) -> CompositePolicy {
        CompositePolicy {
            components: vec![
                VenueId::Binance,
                VenueId::Bybit,
                VenueId::Coinbase,
                VenueId::Kraken,
            ],
            auxiliary: vec![],
            required_quorum: required,
            min_quorum: min,
            outlier_threshold: threshold,
            outlier_on_backfill: false,
            freshness_secs: 90,
        }
    }

    fn state(venue: VenueId, points: &[(i64, f64)]) -> VenueState {
        let mut s = VenueState::new(venue);
        for &(time, price) in points {
            s.record_point(PricePoint { time, price }, 64);
            s.last_price = Some(price);
            s.last_tick_time = Some(time);
        }
        s
    }

    #[test]
    fn below_min_quorum_is_a_gap() {
        let agg = CompositeAggregator::new(policy(3, 4, None));
        let snapshots = vec![
            state(VenueId::Binance, &[(600, 100.0)]),
            state(VenueId::Bybit, &[(600, 101.0)]),
        ];
        let sample = agg.compute(600, &snapshots);
        assert_eq!(sample.quorum, QuorumState::Gap);
        assert_eq!(sample.price, None);
        assert!(sample
            .excluded
            .contains(&(VenueId::Coinbase, ExcludeReason::NoData)));
    }

    #[test]
    fn full_quorum_is_the_exact_mean() {
        let agg = CompositeAggregator::new(policy(3, 4, None));
        let snapshots = vec![
            state(VenueId::Binance, &[(600, 100.0)]),
            state(VenueId::Bybit, &[(600, 101.0)]),
            state(VenueId::Coinbase, &[(600, 99.0)]),
            state(VenueId::Kraken, &[(600, 100.4)]),
        ];
        let sample = agg.compute(600, &snapshots);
        assert_eq!(sample.quorum, QuorumState::Ok);
        let expected = (100.0 + 101.0 + 99.0 + 100.4) / 4.0;
        assert!((sample.price.unwrap() - expected).abs() < 1e-9);
        assert_eq!(sample.included.len(), 4);
    }

    #[test]
    fn three_of_four_is_degraded_with_mean_of_present() {
        // A,B,C report 100/101/99 at t; D reports nothing.
        let agg = CompositeAggregator::new(policy(3, 4, None));
        let snapshots = vec![
            state(VenueId::Binance, &[(600, 100.0)]),
            state(VenueId::Bybit, &[(600, 101.0)]),
            state(VenueId::Coinbase, &[(600, 99.0)]),
            state(VenueId::Kraken, &[]),
        ];
        let sample = agg.compute(600, &snapshots);
        assert_eq!(sample.quorum, QuorumState::Degraded);
        assert!((sample.price.unwrap() - 100.0).abs() < 1e-9);
        assert!(sample
            .excluded
            .contains(&(VenueId::Kraken, ExcludeReason::NoData)));

        // same scenario with min_quorum 4 must gap instead
        let strict = CompositeAggregator::new(policy(4, 4, None));
        let sample = strict.compute(600, &snapshots);
        assert_eq!(sample.quorum, QuorumState::Gap);
        assert_eq!(sample.price, None);
    }

    #[test]
    fn carry_forward_respects_freshness_horizon() {
        let agg = CompositeAggregator::new(policy(2, 4, None));
        let snapshots = vec![
            state(VenueId::Binance, &[(600, 100.0)]),
            state(VenueId::Bybit, &[(540, 101.0)]),   // 60s old: carried
            state(VenueId::Coinbase, &[(480, 99.0)]), // 120s old: stale
            state(VenueId::Kraken, &[]),
        ];
        let sample = agg.compute(600, &snapshots);
        assert_eq!(sample.quorum, QuorumState::Degraded);
        assert!((sample.price.unwrap() - 100.5).abs() < 1e-9);
        assert!(sample
            .excluded
            .contains(&(VenueId::Coinbase, ExcludeReason::Stale)));
    }

    #[test]
    fn outlier_is_excluded_and_mean_recomputed_once() {
        let agg = CompositeAggregator::new(policy(2, 4, Some(0.05)));
        let snapshots = vec![
            state(VenueId::Binance, &[(600, 100.0)]),
            state(VenueId::Bybit, &[(600, 100.5)]),
            state(VenueId::Coinbase, &[(600, 99.5)]),
            state(VenueId::Kraken, &[(600, 108.0)]), // ~5.9% off the mean of 102
        ];
        let sample = agg.compute(600, &snapshots);
        assert!(sample
            .excluded
            .contains(&(VenueId::Kraken, ExcludeReason::Outlier)));
        assert!(!sample.included.contains(&VenueId::Kraken));
        assert!((sample.price.unwrap() - 100.0).abs() < 1e-9);
        assert_eq!(sample.quorum, QuorumState::Degraded);
    }

    #[test]
    fn outlier_removal_below_min_quorum_downgrades_to_gap() {
        let agg = CompositeAggregator::new(policy(2, 2, Some(0.01)));
        let snapshots = vec![
            state(VenueId::Binance, &[(600, 100.0)]),
            state(VenueId::Bybit, &[(600, 200.0)]),
        ];
        // mean 150: both deviate ~33%, both rejected
        let sample = agg.compute(600, &snapshots);
        assert_eq!(sample.quorum, QuorumState::Gap);
        assert_eq!(sample.price, None);
    }

    #[test]
    fn auxiliary_venue_is_reported_but_never_averaged() {
        let mut p = policy(2, 3, None);
        p.components = vec![VenueId::Binance, VenueId::Bybit, VenueId::Coinbase];
        p.auxiliary = vec![VenueId::Kraken];
        let agg = CompositeAggregator::new(p);
        let snapshots = vec![
            state(VenueId::Binance, &[(600, 100.0)]),
            state(VenueId::Bybit, &[(600, 102.0)]),
            state(VenueId::Coinbase, &[(600, 98.0)]),
            state(VenueId::Kraken, &[(600, 500.0)]),
        ];
        let sample = agg.compute(600, &snapshots);
        assert_eq!(sample.quorum, QuorumState::Ok);
        assert!((sample.price.unwrap() - 100.0).abs() < 1e-9);
        assert!(sample
            .excluded
            .contains(&(VenueId::Kraken, ExcludeReason::Auxiliary)));
    }

    #[test]
    fn reconstruction_carries_forward_across_sparse_histories() {
        let agg = CompositeAggregator::new(policy(2, 2, None));
        let histories = HashMap::from([
            (
                VenueId::Binance,
                vec![
                    PricePoint { time: 0, price: 10.0 },
                    PricePoint { time: 120, price: 12.0 },
                ],
            ),
            (
                VenueId::Bybit,
                vec![
                    PricePoint { time: 0, price: 10.2 },
                    PricePoint { time: 60, price: 10.4 },
                    PricePoint { time: 120, price: 12.2 },
                ],
            ),
        ]);
        let samples = agg.reconstruct(Interval::Min1, &histories, 0, 120);
        assert_eq!(samples.len(), 3);
        // at t=60 binance carries 10.0 forward
        assert!((samples[1].price.unwrap() - 10.2).abs() < 1e-9);
        assert_eq!(samples[1].included.len(), 2);
        assert!((samples[2].price.unwrap() - 12.1).abs() < 1e-9);
    }

    #[test]
    fn composite_bar_merges_included_candles_only() {
        let sample = CompositeSample {
            time: 600,
            price: Some(100.0),
            included: vec![VenueId::Binance, VenueId::Bybit],
            excluded: vec![(VenueId::Kraken, ExcludeReason::Outlier)],
            quorum: QuorumState::Degraded,
        };
        let bar = |o, h, l, c, v, bv, sv| ClosedBar {
            candle: Candle { time: 600, open: o, high: h, low: l, close: c, volume: v },
            buy_volume: bv,
            sell_volume: sv,
        };
        let venue_bars = HashMap::from([
            (VenueId::Binance, bar(100.0, 104.0, 98.0, 102.0, 5.0, 3.0, 2.0)),
            (VenueId::Bybit, bar(101.0, 106.0, 100.0, 104.0, 7.0, 4.0, 3.0)),
            (VenueId::Kraken, bar(500.0, 500.0, 500.0, 500.0, 9.0, 9.0, 0.0)),
        ]);
        let merged = composite_bar(&sample, &venue_bars).unwrap();
        assert_eq!(merged.open, 100.5);
        assert_eq!(merged.high, 105.0);
        assert_eq!(merged.volume, 12.0);
        assert_eq!(merged.buy_volume, 7.0);
        assert_eq!(merged.sell_volume, 5.0);
    }
}
