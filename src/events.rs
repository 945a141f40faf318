// =============================================================================
// In-process event stream — spec §6
// =============================================================================
//
// External collaborators (notifications, dashboards) subscribe via
// `EventBus::subscribe`; the core has no compile-time dependency on them.
// Backed by `tokio::sync::broadcast`, already pulled in transitively by
// the `tokio "full"` feature — no extra crate needed for this.
// =============================================================================

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::types::Symbol;

#[derive(Debug, Clone)]
pub enum Event {
    TradeOpened { trade_id: Ulid, symbol: Symbol },
    TradeClosed { trade_id: Ulid, symbol: Symbol, realized_pnl: Decimal, close_reason: String },
    LegFilled { trade_id: Ulid, symbol: Symbol, leg: crate::types::VenueId, qty_filled: Decimal },
    RollbackInitiated { trade_id: Ulid, symbol: Symbol, delta: Decimal },
    BrokenHedgeDetected { trade_id: Ulid, symbol: Symbol, detail: String },
    CircuitBreakerTripped { reason: String },
}

/// Thin wrapper around a broadcast channel. Cloning an `EventBus` clones
/// the sender handle, matching the teacher's pattern of cheaply-cloneable
/// shared handles fanned out to every subsystem (`app_state.rs`).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        // A `send` error here just means there are currently no
        // subscribers; that is not a failure condition for the core.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
