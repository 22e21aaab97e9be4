//! Engine - per-(asset, interval) orchestration
//!
//! Owns every venue feed for one asset, drives the composite aggregator once
//! per interval boundary off read-only snapshots, seeds the composite series
//! from backfilled history, and fans bar records out to the sink.
//!
//! Switching asset or interval is a full stop-then-start: `shutdown()` the
//! running engine and `start()` a fresh one. No state survives a selection
//! change, so a blended price across two instruments cannot occur.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};

use crate::candles::ClosedBar;
use crate::composite::{composite_bar, CompositeAggregator, CompositePolicy};
use crate::config::AppConfig;
use crate::error::FeedResult;
use crate::feed::venues::adapter_for;
use crate::feed::{FeedEvent, FeedParams, VenueFeed};
use crate::history::HistoricalFetcher;
use crate::persistence::{CompositeBarRecord, CsvSink, VenueBarRecord};
use crate::types::{
    Asset, CompositeSample, ExcludeReason, Interval, PriceTick, VenueId, VenueState,
};

/// Live outputs for the presentation layer
#[derive(Debug, Clone)]
pub enum EngineUpdate {
    /// New composite sample, one per interval boundary
    Sample(CompositeSample),
    /// One venue's finalized candle
    VenueBar { venue: VenueId, bar: ClosedBar },
    /// Normalized live tick, pass-through
    Tick(PriceTick),
}

pub struct Engine {
    asset: Asset,
    interval: Interval,
    market_type: String,
    backfill_bars: usize,
    aggregator: CompositeAggregator,
    feeds: Vec<VenueFeed>,
    events_rx: mpsc::Receiver<FeedEvent>,
    updates_tx: broadcast::Sender<EngineUpdate>,
    sink: Option<Arc<CsvSink>>,
    /// Append-only composite series plus a time index into it
    series: Vec<CompositeSample>,
    index: HashMap<i64, usize>,
    /// Finalized venue bars awaiting settlement against their sample
    pending: HashMap<i64, HashMap<VenueId, ClosedBar>>,
    reconstructed: bool,
    /// Buckets at or before this time were persisted by reconstruction
    backfilled_until: i64,
}

impl Engine {
    /// Validate the selection and start one feed per configured venue.
    pub fn start(
        cfg: &AppConfig,
        asset: Asset,
        fetcher: Arc<HistoricalFetcher>,
        sink: Option<Arc<CsvSink>>,
    ) -> FeedResult<Self> {
        let interval = cfg.interval()?;
        let policy = CompositePolicy::from_config(cfg, asset)?;

        let params = FeedParams {
            interval,
            reconnect_delay: Duration::from_millis(cfg.feed.reconnect_delay_ms),
            history_cap: cfg.feed.history_cap,
            backfill_bars: cfg.history.backfill_bars,
        };
        let (events_tx, events_rx) = mpsc::channel(4096);
        let (updates_tx, _) = broadcast::channel(1024);

        let mut feeds = Vec::new();
        for &venue in policy.components.iter().chain(policy.auxiliary.iter()) {
            let feed = VenueFeed::start(
                adapter_for(venue),
                asset,
                params.clone(),
                fetcher.clone(),
                events_tx.clone(),
            )?;
            feeds.push(feed);
        }
        tracing::info!(
            asset = %asset,
            interval = %interval,
            venues = feeds.len(),
            "Engine started"
        );

        Ok(Self {
            asset,
            interval,
            market_type: cfg.bot.market_type.clone(),
            backfill_bars: cfg.history.backfill_bars,
            aggregator: CompositeAggregator::new(policy),
            feeds,
            events_rx,
            updates_tx,
            sink,
            series: Vec::new(),
            index: HashMap::new(),
            pending: HashMap::new(),
            reconstructed: false,
            backfilled_until: i64::MIN,
        })
    }

    /// Subscribe to live engine outputs
    pub fn subscribe(&self) -> broadcast::Receiver<EngineUpdate> {
        self.updates_tx.subscribe()
    }

    /// The composite series accumulated so far
    pub fn series(&self) -> &[CompositeSample] {
        &self.series
    }

    /// Drive the engine until `shutdown` flips, then tear everything down.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = boundary_timer(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = timer.tick() => self.on_boundary().await,
            }
        }
        self.shutdown().await;
    }

    async fn handle_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Tick(tick) => {
                let _ = self.updates_tx.send(EngineUpdate::Tick(tick));
            }
            FeedEvent::State { venue, state } => {
                tracing::info!(venue = %venue, state = %state, "Venue connection state");
            }
            FeedEvent::BarClosed { venue, bar } => {
                let _ = self.updates_tx.send(EngineUpdate::VenueBar { venue, bar });
                self.pending
                    .entry(bar.candle.time)
                    .or_default()
                    .insert(venue, bar);
            }
        }
    }

    /// One interval boundary: compute the sample for the bucket that just
    /// completed, then settle the bucket before it (its venue bars have had a
    /// full interval to arrive).
    async fn on_boundary(&mut self) {
        let now = Utc::now().timestamp();
        let sample_time = self.interval.align(now) - self.interval.secs();
        if self.index.contains_key(&sample_time) {
            return;
        }

        if !self.reconstructed {
            self.reconstruct_backfill(sample_time).await;
            self.reconstructed = true;
        }

        let snapshots: Vec<VenueState> =
            self.feeds.iter().map(|f| f.state().borrow().clone()).collect();
        let sample = self.aggregator.compute(sample_time, &snapshots);
        tracing::info!(
            asset = %self.asset,
            time = sample.time,
            price = ?sample.price,
            quorum = %sample.quorum,
            included = sample.included.len(),
            "Composite sample"
        );
        self.push_sample(sample.clone());
        let _ = self.updates_tx.send(EngineUpdate::Sample(sample));

        self.settle(sample_time - self.interval.secs()).await;
    }

    /// Rebuild composite history from the venues' backfilled series before
    /// the first live sample, flagged `is_backfilled` in the sink.
    async fn reconstruct_backfill(&mut self, first_live: i64) {
        let mut histories = HashMap::new();
        for feed in &self.feeds {
            let state = feed.state().borrow().clone();
            if !state.history.is_empty() {
                histories.insert(state.venue, state.history.iter().copied().collect::<Vec<_>>());
            }
        }
        if histories.is_empty() {
            tracing::warn!(asset = %self.asset, "No backfilled history to reconstruct from");
            return;
        }

        let from = first_live - self.backfill_bars as i64 * self.interval.secs();
        let to = first_live - self.interval.secs();
        let samples = self.aggregator.reconstruct(self.interval, &histories, from, to);
        self.backfilled_until = to;
        let filled = samples.iter().filter(|s| s.price.is_some()).count();
        tracing::info!(
            asset = %self.asset,
            samples = samples.len(),
            filled,
            "Composite history reconstructed"
        );

        for sample in samples {
            if let Some(sink) = &self.sink {
                let record = CompositeBarRecord::from_sample(
                    &sample,
                    None,
                    self.asset,
                    &self.market_type,
                    true,
                );
                if let Err(e) = sink.save_composite(record).await {
                    tracing::error!(error = %e, "Failed to persist backfilled composite bar");
                }
            }
            self.push_sample(sample);
        }
    }

    /// Write the durable records for a settled bucket: the composite bar
    /// merged from included venues, and one record per venue bar mirroring
    /// the sample's exclusions.
    async fn settle(&mut self, time: i64) {
        let bars = self.pending.remove(&time).unwrap_or_default();
        let sample = self.index.get(&time).map(|&i| self.series[i].clone());
        let Some(sink) = self.sink.clone() else {
            return;
        };

        // reconstruction already persisted buckets at or before the watermark
        if time > self.backfilled_until {
            if let Some(sample) = &sample {
                let merged = composite_bar(sample, &bars);
                let record = CompositeBarRecord::from_sample(
                    sample,
                    merged.as_ref(),
                    self.asset,
                    &self.market_type,
                    false,
                );
                if let Err(e) = sink.save_composite(record).await {
                    tracing::error!(error = %e, "Failed to persist composite bar");
                }
            }
        }

        for (venue, bar) in bars {
            let reason = exclusion_for(sample.as_ref(), venue);
            let record = VenueBarRecord::from_bar(&bar, self.asset, venue, reason);
            if let Err(e) = sink.save_venue_bar(record).await {
                tracing::error!(venue = %venue, error = %e, "Failed to persist venue bar");
            }
        }
    }

    fn push_sample(&mut self, sample: CompositeSample) {
        self.index.insert(sample.time, self.series.len());
        self.series.push(sample);
    }

    /// Stop every owned feed and discard accumulated state. After return no
    /// straggler task can deliver a tick from this selection.
    pub async fn shutdown(mut self) {
        for feed in &mut self.feeds {
            feed.stop().await;
        }
        tracing::info!(asset = %self.asset, "Engine stopped");
    }
}

/// Reason a venue was left out of a settled sample, if it was
fn exclusion_for(sample: Option<&CompositeSample>, venue: VenueId) -> Option<ExcludeReason> {
    match sample {
        Some(sample) if sample.included.contains(&venue) => None,
        Some(sample) => sample
            .excluded
            .iter()
            .find(|(v, _)| *v == venue)
            .map(|(_, r)| *r)
            .or(Some(ExcludeReason::NoData)),
        // no sample for this bucket: the venue bar stands alone
        None => Some(ExcludeReason::NoData),
    }
}

/// Ticks once per interval boundary, starting at the next one
fn boundary_timer(interval: Interval) -> tokio::time::Interval {
    let now = Utc::now().timestamp();
    let until_next = interval.align(now) + interval.secs() - now;
    let start = tokio::time::Instant::now() + Duration::from_secs(until_next.max(0) as u64);
    let mut timer = tokio::time::interval_at(start, Duration::from_secs(interval.secs() as u64));
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    timer
}
