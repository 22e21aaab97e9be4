//! Venue adapter implementations (Binance, Bybit, Coinbase, Kraken)

mod binance;
mod bybit;
mod coinbase;
mod kraken;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use coinbase::CoinbaseAdapter;
pub use kraken::KrakenAdapter;

use std::sync::Arc;

use crate::feed::adapter::VenueAdapter;
use crate::types::VenueId;

/// Adapter for a venue id
pub fn adapter_for(venue: VenueId) -> Arc<dyn VenueAdapter> {
    match venue {
        VenueId::Binance => Arc::new(BinanceAdapter),
        VenueId::Bybit => Arc::new(BybitAdapter),
        VenueId::Coinbase => Arc::new(CoinbaseAdapter),
        VenueId::Kraken => Arc::new(KrakenAdapter),
    }
}
