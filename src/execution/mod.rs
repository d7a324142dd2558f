// =============================================================================
// Execution — order submission, polling, and symbol validation
// =============================================================================

pub mod engine;
pub mod symbols;

pub use engine::{ExecutionEngine, ExecutionError};
pub use symbols::{SymbolProperties, SymbolPropertiesCache};
