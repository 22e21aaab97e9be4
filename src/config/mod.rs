//! Configuration management for PriceFuse
//!
//! Loads from YAML files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{FeedError, FeedResult};
use crate::types::{Asset, Interval, VenueId};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    /// Per-asset venue support matrix
    pub assets: HashMap<String, AssetVenues>,
    pub composite: CompositeConfig,
    pub feed: FeedConfig,
    pub history: HistoryConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Assets to run engines for
    pub assets: Vec<String>,
    /// Candle interval (15s, 1m, 5m, 15m, 1h)
    pub interval: String,
    /// Market type tag carried into persisted records
    pub market_type: String,
}

/// Which venues carry an asset
#[derive(Debug, Clone, Deserialize)]
pub struct AssetVenues {
    /// Formula membership: the venues whose prices enter the composite mean
    pub components: Vec<String>,
    /// Venues reported alongside the sample but never averaged
    #[serde(default)]
    pub auxiliary: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompositeConfig {
    /// Preferred quorum; 0 means "all configured components"
    pub required_quorum: usize,
    /// Minimum quorum below which the sample is a gap
    pub min_quorum: usize,
    /// Relative deviation beyond which a venue is excluded; None disables
    pub outlier_threshold: Option<f64>,
    /// Apply outlier rejection during historical reconstruction too
    pub outlier_on_backfill: bool,
    /// Carry-forward freshness horizon in seconds
    pub freshness_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Fixed reconnect delay in milliseconds
    pub reconnect_delay_ms: u64,
    /// Bound on the per-venue aligned price series kept in memory
    pub history_cap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Bars to backfill per venue before streaming
    pub backfill_bars: usize,
    /// Per-request HTTP timeout in milliseconds
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory for CSV output
    pub data_dir: String,
    /// Enable CSV record sinks
    pub csv_enabled: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Bot defaults
            .set_default("bot.assets", vec!["BTC", "ETH"])?
            .set_default("bot.interval", "1m")?
            .set_default("bot.market_type", "spot")?
            // Support matrix defaults: all four component venues per asset
            .set_default("assets.btc.components", default_components())?
            .set_default("assets.eth.components", default_components())?
            .set_default("assets.sol.components", default_components())?
            .set_default("assets.xrp.components", default_components())?
            // Composite defaults
            .set_default("composite.required_quorum", 0)?
            .set_default("composite.min_quorum", 2)?
            .set_default("composite.outlier_threshold", 0.05)?
            .set_default("composite.outlier_on_backfill", false)?
            .set_default("composite.freshness_secs", 90)?
            // Feed defaults
            .set_default("feed.reconnect_delay_ms", 5000)?
            .set_default("feed.history_cap", 1024)?
            // History defaults
            .set_default("history.backfill_bars", 500)?
            .set_default("history.request_timeout_ms", 30000)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEFUSE_*)
            .add_source(Environment::with_prefix("PRICEFUSE").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Candle interval selected for this run
    pub fn interval(&self) -> FeedResult<Interval> {
        Interval::parse(&self.bot.interval).ok_or_else(|| {
            FeedError::Configuration(format!("unknown interval '{}'", self.bot.interval))
        })
    }

    /// Assets the engines run for
    pub fn run_assets(&self) -> FeedResult<Vec<Asset>> {
        self.bot
            .assets
            .iter()
            .map(|s| {
                Asset::parse(s)
                    .ok_or_else(|| FeedError::Configuration(format!("unknown asset '{}'", s)))
            })
            .collect()
    }

    /// Formula membership for an asset, from the support matrix
    pub fn components(&self, asset: Asset) -> FeedResult<Vec<VenueId>> {
        let entry = self.matrix_entry(asset)?;
        entry.components.iter().map(|s| parse_venue(s)).collect()
    }

    /// Auxiliary venues for an asset (reported, never averaged)
    pub fn auxiliary(&self, asset: Asset) -> FeedResult<Vec<VenueId>> {
        let entry = self.matrix_entry(asset)?;
        entry.auxiliary.iter().map(|s| parse_venue(s)).collect()
    }

    /// Preferred quorum resolved against the asset's component count
    pub fn required_quorum(&self, asset: Asset) -> FeedResult<usize> {
        let components = self.components(asset)?;
        Ok(match self.composite.required_quorum {
            0 => components.len(),
            n => n,
        })
    }

    fn matrix_entry(&self, asset: Asset) -> FeedResult<&AssetVenues> {
        self.assets
            .get(&asset.to_string().to_lowercase())
            .ok_or_else(|| {
                FeedError::Configuration(format!("no venue matrix entry for asset {}", asset))
            })
    }

    /// Reject configurations that could never produce a trustworthy composite.
    ///
    /// Runs before any feed starts; failures here are fatal.
    pub fn validate(&self) -> FeedResult<()> {
        self.interval()?;
        if self.composite.min_quorum == 0 {
            return Err(FeedError::Configuration(
                "composite.min_quorum must be at least 1".into(),
            ));
        }
        if let Some(threshold) = self.composite.outlier_threshold {
            if threshold <= 0.0 {
                return Err(FeedError::Configuration(
                    "composite.outlier_threshold must be positive".into(),
                ));
            }
        }
        for asset in self.run_assets()? {
            let components = self.components(asset)?;
            if components.is_empty() {
                return Err(FeedError::Configuration(format!(
                    "asset {} has no component venues",
                    asset
                )));
            }
            let mut unique = components.clone();
            unique.sort();
            unique.dedup();
            if unique.len() != components.len() {
                return Err(FeedError::Configuration(format!(
                    "asset {} lists a component venue twice",
                    asset
                )));
            }
            let required = self.required_quorum(asset)?;
            if required > components.len() {
                return Err(FeedError::Configuration(format!(
                    "asset {}: required_quorum {} exceeds {} component venues",
                    asset,
                    required,
                    components.len()
                )));
            }
            if self.composite.min_quorum > required {
                return Err(FeedError::Configuration(format!(
                    "asset {}: min_quorum {} exceeds required_quorum {}",
                    asset, self.composite.min_quorum, required
                )));
            }
            // An asset that cannot ever reach minimum quorum must be rejected
            // here rather than producing permanent gaps.
            if components.len() < self.composite.min_quorum {
                return Err(FeedError::Configuration(format!(
                    "asset {}: {} component venues cannot reach min_quorum {}",
                    asset,
                    components.len(),
                    self.composite.min_quorum
                )));
            }
            for venue in self.auxiliary(asset)? {
                if components.contains(&venue) {
                    return Err(FeedError::Configuration(format!(
                        "asset {}: venue {} is both component and auxiliary",
                        asset, venue
                    )));
                }
            }
        }
        Ok(())
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "assets={:?} interval={} min_quorum={} required_quorum={} outlier={:?} freshness={}s",
            self.bot.assets,
            self.bot.interval,
            self.composite.min_quorum,
            self.composite.required_quorum,
            self.composite.outlier_threshold,
            self.composite.freshness_secs
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

fn parse_venue(s: &str) -> FeedResult<VenueId> {
    VenueId::parse(s).ok_or_else(|| FeedError::Configuration(format!("unknown venue '{}'", s)))
}

fn default_components() -> Vec<&'static str> {
    vec!["binance", "bybit", "coinbase", "kraken"]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            bot: BotConfig {
                assets: vec!["BTC".into()],
                interval: "1m".into(),
                market_type: "spot".into(),
            },
            assets: HashMap::from([(
                "btc".to_string(),
                AssetVenues {
                    components: vec!["binance".into(), "bybit".into(), "coinbase".into()],
                    auxiliary: vec![],
                },
            )]),
            composite: CompositeConfig {
                required_quorum: 0,
                min_quorum: 2,
                outlier_threshold: Some(0.05),
                outlier_on_backfill: false,
                freshness_secs: 90,
            },
            feed: FeedConfig {
                reconnect_delay_ms: 5000,
                history_cap: 1024,
            },
            history: HistoryConfig {
                backfill_bars: 500,
                request_timeout_ms: 30000,
            },
            persistence: PersistenceConfig {
                data_dir: "./data".into(),
                csv_enabled: false,
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.required_quorum(Asset::BTC).unwrap(), 3);
    }

    #[test]
    fn min_quorum_beyond_components_is_rejected() {
        let mut cfg = base_config();
        cfg.composite.min_quorum = 4;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, FeedError::Configuration(_)));
    }

    #[test]
    fn unknown_venue_name_is_rejected() {
        let mut cfg = base_config();
        cfg.assets.get_mut("btc").unwrap().components.push("ftx".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn asset_without_matrix_entry_is_rejected() {
        let mut cfg = base_config();
        cfg.bot.assets.push("ETH".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn venue_in_both_roles_is_rejected() {
        let mut cfg = base_config();
        cfg.assets.get_mut("btc").unwrap().auxiliary.push("binance".into());
        assert!(cfg.validate().is_err());
    }
}
