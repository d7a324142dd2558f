// =============================================================================
// Pre-trade gates — per-signal guards evaluated before risk and execution
// =============================================================================

pub mod cooldown;
pub mod single_trade;

pub use cooldown::CooldownGate;
pub use single_trade::{SingleTradeGuard, SingleTradeVerdict};
