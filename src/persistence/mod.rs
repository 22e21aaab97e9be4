//! CSV Persistence Module
//!
//! Durable sink for composite and per-venue bar records. The SQL store is an
//! external collaborator; these records are its input shape.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;

use crate::candles::ClosedBar;
use crate::composite::CompositeBar;
use crate::types::{Asset, CompositeSample, ExcludeReason, QuorumState, VenueId};

/// Durable form of a `CompositeSample` plus order-flow detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeBarRecord {
    pub time: i64,
    pub asset: String,
    pub market_type: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub degraded: bool,
    pub is_gap: bool,
    pub is_backfilled: bool,
    /// Space-separated venue names
    pub included: String,
    /// Space-separated `venue:reason` pairs
    pub excluded: String,
}

impl CompositeBarRecord {
    pub fn from_sample(
        sample: &CompositeSample,
        bar: Option<&CompositeBar>,
        asset: Asset,
        market_type: &str,
        is_backfilled: bool,
    ) -> Self {
        let price = sample.price.unwrap_or(0.0);
        Self {
            time: sample.time,
            asset: asset.to_string(),
            market_type: market_type.to_string(),
            open: bar.map_or(price, |b| b.open),
            high: bar.map_or(price, |b| b.high),
            low: bar.map_or(price, |b| b.low),
            close: bar.map_or(price, |b| b.close),
            volume: bar.map_or(0.0, |b| b.volume),
            buy_volume: bar.map_or(0.0, |b| b.buy_volume),
            sell_volume: bar.map_or(0.0, |b| b.sell_volume),
            degraded: sample.quorum == QuorumState::Degraded,
            is_gap: sample.quorum == QuorumState::Gap,
            is_backfilled,
            included: join_venues(&sample.included),
            excluded: join_exclusions(&sample.excluded),
        }
    }
}

/// Durable form of one venue's finalized candle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueBarRecord {
    pub time: i64,
    pub asset: String,
    pub venue: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub included_in_composite: bool,
    pub exclude_reason: Option<String>,
}

impl VenueBarRecord {
    pub fn from_bar(
        bar: &ClosedBar,
        asset: Asset,
        venue: VenueId,
        exclude_reason: Option<ExcludeReason>,
    ) -> Self {
        Self {
            time: bar.candle.time,
            asset: asset.to_string(),
            venue: venue.to_string(),
            open: bar.candle.open,
            high: bar.candle.high,
            low: bar.candle.low,
            close: bar.candle.close,
            volume: bar.candle.volume,
            buy_volume: bar.buy_volume,
            sell_volume: bar.sell_volume,
            included_in_composite: exclude_reason.is_none(),
            exclude_reason: exclude_reason.map(|r| r.as_str().to_string()),
        }
    }
}

/// Append-only CSV sinks under the configured data directory
pub struct CsvSink {
    composite_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    venue_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
}

impl CsvSink {
    pub fn new(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir);
        fs::create_dir_all(dir).context("Failed to create data directory")?;

        Ok(Self {
            composite_writer: Arc::new(AsyncRwLock::new(Self::create_writer(
                dir,
                "composite_bars.csv",
            )?)),
            venue_writer: Arc::new(AsyncRwLock::new(Self::create_writer(
                dir,
                "venue_bars.csv",
            )?)),
        })
    }

    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<std::fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open CSV file")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(writer)
    }

    /// Save a composite bar record
    pub async fn save_composite(&self, record: CompositeBarRecord) -> Result<()> {
        let mut writer = self.composite_writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write composite bar record")?;
        writer.flush().context("Failed to flush composite writer")?;
        Ok(())
    }

    /// Save a per-venue bar record
    pub async fn save_venue_bar(&self, record: VenueBarRecord) -> Result<()> {
        let mut writer = self.venue_writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write venue bar record")?;
        writer.flush().context("Failed to flush venue writer")?;
        Ok(())
    }
}

fn join_venues(venues: &[VenueId]) -> String {
    venues
        .iter()
        .map(|v| v.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_exclusions(excluded: &[(VenueId, ExcludeReason)]) -> String {
    excluded
        .iter()
        .map(|(v, r)| format!("{}:{}", v.as_str(), r.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}
