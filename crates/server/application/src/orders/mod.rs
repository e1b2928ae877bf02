//! Order lifecycle use cases

pub mod commands;
pub mod service;

pub use commands::{CashCollectionOutcome, PlaceOrder};
pub use service::OrderLifecycleService;
