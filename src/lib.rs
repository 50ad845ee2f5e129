//! ORCID Claim Reconciliation Pipeline Library
//!
//! This library reconciles the works an author claims on their ORCID
//! profile against the claims stored for a bibliographic corpus, and
//! streams per-record claim updates to the downstream index pipeline.

pub mod config;
pub mod error;

pub mod api;
pub mod importer;
pub mod matcher;
pub mod pipeline;
pub mod storage;
pub mod store;
pub mod updater;

pub mod admin;

// Re-export main types for easy access
pub use config::Config;
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
