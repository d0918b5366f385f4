//! Risk Manager
//!
//! Trailing-stop engine, drawdown circuit breaker and daily baseline
//! reconciliation for a leveraged derivatives account.

pub mod baseline;
pub mod dispatcher;
pub mod drawdown;
pub mod retry;
pub mod trailing_stop;

#[cfg(any(test, feature = "test-util"))]
pub mod mocks;

pub use baseline::{
    duration_until_next_midnight, BaselineCell, BaselineClient, BaselineEquity, BaselineResolver,
    BaselineSource,
};
pub use dispatcher::{engine_channel, EventDispatcher, ENGINE_QUEUE_CAPACITY};
pub use drawdown::{DrawdownCheck, DrawdownConfig, DrawdownMonitor};
pub use retry::RetryPolicy;
pub use trailing_stop::{
    initial_stop, next_stop, pnl_percent, step_trigger, MonitoringEntry, PoolSizes, TrailingConfig,
    TrailingEntry, TrailingStopEngine,
};
