//! Realmgate Common - Shared utilities and types
//!
//! This crate provides common functionality used across Realmgate components:
//! - Error types and handling
//! - Configuration management
//! - Logging bootstrap
//! - Metrics

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use error::{Error, Result};
