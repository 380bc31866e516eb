//! # YuE Common Library
//!
//! Shared code for the YuE generation service:
//! - Configuration loading (TOML bootstrap + command-line/environment overrides)
//! - Supported model catalog
//! - Common error type

pub mod config;
pub mod error;
pub mod models;

pub use error::{Error, Result};
