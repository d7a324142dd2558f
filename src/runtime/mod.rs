// =============================================================================
// Runtime — cycle scheduler, circuit breaker, adaptive sleep
// =============================================================================

pub mod app;
pub mod circuit_breaker;

pub use app::{run, RunOptions, Runtime};
pub use circuit_breaker::ConsecutiveFailureBreaker;
