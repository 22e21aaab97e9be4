//! End-to-end scenarios across the aggregation pipeline

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pricefuse::bucket::{rebucket, IntervalBucketer};
    use pricefuse::candles::CandleStream;
    use pricefuse::composite::{composite_bar, CompositeAggregator, CompositePolicy};
    use pricefuse::config::{
        AppConfig, AssetVenues, BotConfig, CompositeConfig, FeedConfig, HistoryConfig,
        PersistenceConfig,
    };
    use pricefuse::types::{
        Asset, Candle, ExcludeReason, Interval, PricePoint, QuorumState, Side, TradeEvent,
        VenueId, VenueState,
    };

    fn test_config(components: Vec<&str>, min_quorum: usize) -> AppConfig {
        AppConfig {
            bot: BotConfig {
                assets: vec!["BTC".into()],
                interval: "1m".into(),
                market_type: "spot".into(),
            },
            assets: HashMap::from([(
                "btc".to_string(),
                AssetVenues {
                    components: components.into_iter().map(String::from).collect(),
                    auxiliary: vec![],
                },
            )]),
            composite: CompositeConfig {
                required_quorum: 0,
                min_quorum,
                outlier_threshold: Some(0.05),
                outlier_on_backfill: false,
                freshness_secs: 90,
            },
            feed: FeedConfig {
                reconnect_delay_ms: 5000,
                history_cap: 1024,
            },
            history: HistoryConfig {
                backfill_bars: 100,
                request_timeout_ms: 30000,
            },
            persistence: PersistenceConfig {
                data_dir: "./data".into(),
                csv_enabled: false,
            },
        }
    }

    fn venue_state(venue: VenueId, points: &[(i64, f64)]) -> VenueState {
        let mut state = VenueState::new(venue);
        for &(time, price) in points {
            state.record_point(PricePoint { time, price }, 256);
            state.last_price = Some(price);
            state.last_tick_time = Some(time);
        }
        state
    }

    /// Four venues configured, required quorum all four, A/B/C report and D
    /// is silent: degraded mean of three with a permissive minimum, gap with
    /// a strict one.
    #[test]
    fn quorum_scenario_three_of_four() {
        let cfg = test_config(vec!["binance", "bybit", "coinbase", "kraken"], 3);
        cfg.validate().unwrap();
        let policy = CompositePolicy::from_config(&cfg, Asset::BTC).unwrap();
        assert_eq!(policy.required_quorum, 4);

        let snapshots = vec![
            venue_state(VenueId::Binance, &[(600, 100.0)]),
            venue_state(VenueId::Bybit, &[(600, 101.0)]),
            venue_state(VenueId::Coinbase, &[(600, 99.0)]),
            venue_state(VenueId::Kraken, &[]),
        ];

        let sample = CompositeAggregator::new(policy).compute(600, &snapshots);
        assert_eq!(sample.quorum, QuorumState::Degraded);
        assert!((sample.price.unwrap() - 100.0).abs() < 1e-9);
        assert!(sample
            .excluded
            .contains(&(VenueId::Kraken, ExcludeReason::NoData)));

        let strict = test_config(vec!["binance", "bybit", "coinbase", "kraken"], 4);
        let policy = CompositePolicy::from_config(&strict, Asset::BTC).unwrap();
        let sample = CompositeAggregator::new(policy).compute(600, &snapshots);
        assert_eq!(sample.quorum, QuorumState::Gap);
        assert_eq!(sample.price, None);
    }

    /// An asset that can never reach minimum quorum is rejected at setup,
    /// before any feed would start.
    #[test]
    fn unreachable_quorum_is_a_configuration_error() {
        let cfg = test_config(vec!["binance"], 2);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("min_quorum"));
    }

    /// Interval 15s requested against 60s-native data and the reverse: four
    /// 15s ticks collapse to one 60s bucket upward, and stay four buckets
    /// when consumed directly.
    #[test]
    fn native_interval_synthesis_both_directions() {
        let ticks = [(0, 10.0), (15, 11.0), (30, 9.0), (45, 12.0)];

        let mut fine = IntervalBucketer::new(Interval::Sec15);
        let mut fine_buckets = Vec::new();
        for (time, price) in ticks {
            if let Some(update) = fine.observe(time, price, 1.0) {
                fine_buckets.extend(update.completed);
            }
        }
        fine_buckets.extend(fine.flush());
        assert_eq!(fine_buckets.len(), 4);

        let coarse = rebucket(&fine_buckets, Interval::Min1);
        assert_eq!(coarse.len(), 1);
        assert_eq!(
            (coarse[0].open, coarse[0].high, coarse[0].low, coarse[0].close),
            (10.0, 12.0, 9.0, 12.0)
        );

        // coarser-native data re-bucketed to a finer target keeps the
        // provider's timestamps as authoritative bucket starts
        let finer_again = rebucket(&coarse, Interval::Sec15);
        assert_eq!(finer_again.len(), 1);
        assert_eq!(finer_again[0].time, 0);
    }

    /// Trade ticks and official bar confirmations reconcile into one candle
    /// per venue, and the included venues' candles merge into the composite
    /// bar with summed flow.
    #[test]
    fn candles_reconcile_and_merge_into_composite_bar() {
        let trade = |venue, time, price, size, side| TradeEvent {
            venue,
            asset: Asset::BTC,
            time,
            price,
            size,
            side,
        };

        let mut binance = CandleStream::new(Interval::Min1, 16);
        binance.on_trade(&trade(VenueId::Binance, 600, 100.0, 1.0, Side::Buy));
        binance.on_trade(&trade(VenueId::Binance, 630, 104.0, 1.0, Side::Sell));
        binance.on_bar(&Candle {
            time: 600,
            open: 100.0,
            high: 103.0,
            low: 99.5,
            close: 102.0,
            volume: 40.0,
        });

        let mut bybit = CandleStream::new(Interval::Min1, 16);
        bybit.on_trade(&trade(VenueId::Bybit, 610, 101.0, 2.0, Side::Buy));
        bybit.on_bar(&Candle {
            time: 600,
            open: 101.0,
            high: 102.0,
            low: 100.0,
            close: 101.5,
            volume: 20.0,
        });

        // rolling into the next bucket finalizes both venue candles
        let binance_bar = binance
            .on_trade(&trade(VenueId::Binance, 660, 104.5, 0.1, Side::Buy))
            .unwrap();
        let bybit_bar = bybit
            .on_trade(&trade(VenueId::Bybit, 661, 101.2, 0.1, Side::Buy))
            .unwrap();

        // trades advanced the range beyond the official bar, volume is the
        // official count
        assert_eq!(binance_bar.candle.high, 104.0);
        assert_eq!(binance_bar.candle.volume, 40.0);
        assert_eq!(binance_bar.buy_volume, 1.0);
        assert_eq!(binance_bar.sell_volume, 1.0);

        let sample = CompositeAggregator::new(CompositePolicy {
            components: vec![VenueId::Binance, VenueId::Bybit],
            auxiliary: vec![],
            required_quorum: 2,
            min_quorum: 2,
            outlier_threshold: None,
            outlier_on_backfill: false,
            freshness_secs: 90,
        })
        .compute(
            600,
            &[
                venue_state(VenueId::Binance, &[(600, 104.0)]),
                venue_state(VenueId::Bybit, &[(600, 101.2)]),
            ],
        );
        assert_eq!(sample.quorum, QuorumState::Ok);

        let venue_bars = HashMap::from([
            (VenueId::Binance, binance_bar),
            (VenueId::Bybit, bybit_bar),
        ]);
        let merged = composite_bar(&sample, &venue_bars).unwrap();
        assert_eq!(merged.time, 600);
        assert_eq!(merged.volume, 60.0);
        assert_eq!(merged.buy_volume, 3.0);
        // mean of the two venue highs: trades carried binance to 104, bybit
        // never traded above 101
        assert_eq!(merged.high, 102.5);
    }

    /// Historical reconstruction honors the outlier opt-in flag.
    #[test]
    fn backfill_outlier_rule_is_opt_in() {
        let histories = HashMap::from([
            (VenueId::Binance, vec![PricePoint { time: 600, price: 100.0 }]),
            (VenueId::Bybit, vec![PricePoint { time: 600, price: 100.5 }]),
            (VenueId::Coinbase, vec![PricePoint { time: 600, price: 99.5 }]),
            (VenueId::Kraken, vec![PricePoint { time: 600, price: 108.0 }]),
        ]);
        let mut policy = CompositePolicy {
            components: vec![
                VenueId::Binance,
                VenueId::Bybit,
                VenueId::Coinbase,
                VenueId::Kraken,
            ],
            auxiliary: vec![],
            required_quorum: 4,
            min_quorum: 2,
            outlier_threshold: Some(0.05),
            outlier_on_backfill: false,
            freshness_secs: 90,
        };

        // default: backfill reproduces the venue record faithfully
        let samples = CompositeAggregator::new(policy.clone()).reconstruct(
            Interval::Min1,
            &histories,
            600,
            600,
        );
        assert_eq!(samples[0].included.len(), 4);
        assert_eq!(samples[0].quorum, QuorumState::Ok);

        // opted in: the live rule applies to history too
        policy.outlier_on_backfill = true;
        let samples = CompositeAggregator::new(policy).reconstruct(
            Interval::Min1,
            &histories,
            600,
            600,
        );
        assert!(samples[0]
            .excluded
            .contains(&(VenueId::Kraken, ExcludeReason::Outlier)));
        assert!((samples[0].price.unwrap() - 100.0).abs() < 1e-9);
    }
}
