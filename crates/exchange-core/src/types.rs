//! Core domain types for the trailing-stop system.

pub mod account;
pub mod event;
pub mod position;
pub mod trade;

pub use account::*;
pub use event::*;
pub use position::*;
pub use trade::*;
