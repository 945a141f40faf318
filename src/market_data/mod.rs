// =============================================================================
// Market data service — spec §4.C
// =============================================================================

pub mod service;
pub mod snapshot;

pub use service::MarketDataService;
pub use snapshot::{Freshness, SymbolSnapshot, VenueSnapshot};
