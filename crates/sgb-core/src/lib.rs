//! Core domain and application logic for the subscription-gated channel bot.
//!
//! Framework-agnostic: the subscription sheet, the price feed and Telegram
//! live behind ports (traits) implemented in adapter crates.

pub mod access;
pub mod alerts;
pub mod config;
pub mod domain;
pub mod errors;
pub mod feed;
pub mod levels;
pub mod logging;
pub mod ports;
pub mod renewal;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod throttled;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
