// =============================================================================
// Persistent state — transaction log, positions, daily limits, stop map
// =============================================================================

pub mod limits;
pub mod position_store;
pub mod stops;
pub mod transaction_log;

pub use limits::LimitsTracker;
pub use position_store::{Position, PositionStore};
pub use stops::StopLifecycleManager;
pub use transaction_log::TransactionLog;
