//! Persistence adapters by technology

pub mod postgres;

pub use postgres::*;
