//! kvbridge Common - Shared types and utilities
//!
//! This crate provides the error taxonomy, configuration structures and
//! core data types used across all kvbridge components.

pub mod config;
pub mod error;
pub mod types;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use types::*;
