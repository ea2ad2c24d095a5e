//! Core domain + application logic for the Pomni mini app access layer.
//!
//! This crate is intentionally framework-agnostic. The HTTP backend and the
//! Telegram host environment live behind ports (traits) implemented in
//! adapter crates.

pub mod access;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod gate;
pub mod identity;
pub mod logging;
pub mod timer;

pub use errors::{Error, Result};
