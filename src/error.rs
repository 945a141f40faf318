// =============================================================================
// Error taxonomy — spec §7
// =============================================================================
//
// Adapters never leak SDK-specific exception types past their own boundary;
// every venue call returns a `VenueError` tagged with one of the kinds
// below. The engine pattern-matches only on `VenueErrorKind`, never on
// anything venue-specific.
// =============================================================================

use thiserror::Error;

/// Classification of a venue-adapter failure. Not a language type hierarchy —
/// a closed set the core reasons about directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueErrorKind {
    /// Input failed a precondition; never retried, surfaces to caller.
    Validation,
    /// Retried with backoff inside the adapter; surfaces only once budget
    /// is exhausted.
    RateLimited,
    /// Network or 5xx; retried inside the adapter.
    VenueTransient,
    /// Rejected by the venue for a business reason.
    VenueRejection(VenueRejectionReason),
    /// Cooperative timeout; caller decides retry vs escalate vs rollback.
    Timeout,
    /// The venue is unreachable after the retry budget was spent.
    VenueUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueRejectionReason {
    OrderReject,
    InsufficientMargin,
    PriceOutOfBounds,
    ReduceOnlyInvalid,
    DuplicateClientId,
    Other(String),
}

impl std::fmt::Display for VenueRejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OrderReject => write!(f, "order_reject"),
            Self::InsufficientMargin => write!(f, "insufficient_margin"),
            Self::PriceOutOfBounds => write!(f, "price_out_of_bounds"),
            Self::ReduceOnlyInvalid => write!(f, "reduce_only_invalid"),
            Self::DuplicateClientId => write!(f, "duplicate_client_id"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A single venue-adapter error. `retryable` is a hint the engine may use
/// to decide whether to retry locally rather than re-deriving it from
/// `kind` every time.
#[derive(Debug, Error, Clone)]
#[error("venue error ({kind:?}): {message}")]
pub struct VenueError {
    pub kind: VenueErrorKind,
    pub message: String,
}

impl VenueError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self { kind: VenueErrorKind::Validation, message: msg.into() }
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self { kind: VenueErrorKind::RateLimited, message: msg.into() }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self { kind: VenueErrorKind::VenueTransient, message: msg.into() }
    }

    pub fn rejection(reason: VenueRejectionReason, msg: impl Into<String>) -> Self {
        Self {
            kind: VenueErrorKind::VenueRejection(reason),
            message: msg.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self { kind: VenueErrorKind::Timeout, message: msg.into() }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self { kind: VenueErrorKind::VenueUnavailable, message: msg.into() }
    }

    /// True when this error is the idempotent-retry "already placed"
    /// signal the execution engine treats as success (spec §4.E).
    pub fn is_duplicate_client_id(&self) -> bool {
        matches!(
            self.kind,
            VenueErrorKind::VenueRejection(VenueRejectionReason::DuplicateClientId)
        )
    }
}

/// Engine-level errors that are not venue-specific: FSM violations,
/// broken hedges, and internal-consistency failures that must abort the
/// supervisor per spec §7.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("broken hedge on {symbol}: {detail}")]
    BrokenHedge { symbol: String, detail: String },

    #[error("fatal invariant violated: {0}")]
    FatalInvariant(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_client_id_detection() {
        let e = VenueError::rejection(VenueRejectionReason::DuplicateClientId, "dup");
        assert!(e.is_duplicate_client_id());

        let e2 = VenueError::rejection(VenueRejectionReason::InsufficientMargin, "no margin");
        assert!(!e2.is_duplicate_client_id());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let e = VenueError::timeout("no response in 2s");
        let s = e.to_string();
        assert!(s.contains("Timeout"));
        assert!(s.contains("no response in 2s"));
    }
}
