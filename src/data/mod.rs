// =============================================================================
// Market data — canonical bar contract, staleness guard, bar provider
// =============================================================================

pub mod bar;
pub mod provider;
pub mod staleness;

pub use bar::{Bar, BarError, Timeframe};
pub use provider::{BarProvider, BrokerBarProvider};
pub use staleness::{StalenessGuard, StalenessReason, StalenessVerdict};
