//! # BPC Common Library
//!
//! Shared code for the bot profile creator pipeline stages:
//! - Error type shared by every stage
//! - Configuration loading and root folder resolution
//! - Atomic file writes

pub mod config;
pub mod error;
pub mod fs;

pub use error::{Error, Result};
