// =============================================================================
// Broker boundary — the only gateway to the remote order/account API
// =============================================================================
//
// The broker is treated as an opaque, failure-prone remote service. Every
// call site goes through the `BrokerApi` trait so the runtime, execution
// engine, and recovery coordinator can be exercised against a scripted
// double in tests.
// =============================================================================

pub mod http;
pub mod retry;
pub mod types;

use async_trait::async_trait;

use crate::data::bar::Bar;
use crate::execution::symbols::SymbolProperties;
pub use http::HttpBrokerConnector;
pub use retry::RetryPolicy;
pub use types::{
    AccountInfo, BrokerClockInfo, BrokerError, BrokerOrder, BrokerOrderStatus, BrokerPosition,
    OrderRequest,
};

/// Remote broker operations used by the runtime.
///
/// Only the execution engine and the recovery coordinator may call the
/// mutating operations (`submit_order`, `cancel_order`).
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Market clock: open flag plus the next open/close boundaries.
    async fn get_clock(&self) -> Result<BrokerClockInfo, BrokerError>;

    /// Account snapshot (portfolio value, buying power) as reported strings.
    async fn get_account_info(&self) -> Result<AccountInfo, BrokerError>;

    /// Most recent bars for a symbol, oldest first.
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Submit a new order. Returns the broker's view of the created order.
    async fn submit_order(&self, request: &OrderRequest) -> Result<BrokerOrder, BrokerError>;

    /// Cancel an order by broker ID.
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// Current broker view of one order (status + cumulative fill).
    async fn get_order_status(&self, broker_order_id: &str) -> Result<BrokerOrder, BrokerError>;

    /// All currently open orders on the account.
    async fn list_open_orders(&self) -> Result<Vec<BrokerOrder>, BrokerError>;

    /// All currently held positions on the account.
    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Trading properties for a symbol (tick, lot, tradability).
    async fn get_symbol_info(&self, symbol: &str) -> Result<SymbolProperties, BrokerError>;
}
