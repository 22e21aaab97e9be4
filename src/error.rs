//! Error taxonomy for the price engine.

use crate::types::VenueId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    /// Recoverable transport failure; the feed reconnects after the fixed delay.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Recoverable per-message failure; the message is dropped and logged.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Every configured REST mirror for the venue has been tried and failed.
    #[error("Upstream unavailable for {venue}: {detail}")]
    UpstreamUnavailable { venue: VenueId, detail: String },

    /// Fatal at setup; rejected before any feed starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
