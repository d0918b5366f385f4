//! API clients for external services.

pub mod auth;
pub mod balance;
pub mod bybit;
pub mod stream;

pub use balance::BalanceServiceClient;
pub use bybit::BybitClient;
