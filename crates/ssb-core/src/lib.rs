//! Core domain + application logic for the Sozvezdie Skidok bot.
//!
//! This crate is intentionally framework-agnostic. Telegram / the completion
//! service live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod menu;
pub mod messaging;
pub mod ports;
pub mod session;
pub mod store;
pub mod texts;

pub use errors::{Error, Result};
