//! # Tracker Common Library
//!
//! Shared code for the tracker import services:
//! - Common error type
//! - Configuration loading (TOML + environment overrides)
//! - Logging initialisation
//! - SQLite pool initialisation
//! - UID generation and validation
//! - Import event bus

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod uid;

pub use error::{Error, Result};
