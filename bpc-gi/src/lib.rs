//! bpc-gi library interface
//!
//! Gender identification stage of the bot profile creator: classifies the
//! avatar images of the asset store and produces a validated run result
//! with per-label pools for profile assignment.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{GiError, GiResult, LedgerError};
