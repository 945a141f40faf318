// =============================================================================
// Trade store — spec §4.B
// =============================================================================

pub mod schema;
pub mod store;

pub use store::{TradeStore, TradeStoreHandle};
