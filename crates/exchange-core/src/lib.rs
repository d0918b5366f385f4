//! Exchange Core Library
//!
//! Shared types, configuration, and the exchange gateway used by the
//! trailing-stop bot and the balance service.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod types;

pub use error::{Error, Result};
pub use gateway::ExchangeGateway;
