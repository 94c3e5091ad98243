//! Pullship - pull-based continuous deployment
//!
//! Polls a release host for new artifacts, caches them, extracts each new
//! version into a timestamped slot, repoints a `current` link and starts or
//! gracefully restarts a managed server.

pub mod cache;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod deploy;
pub mod error;
pub mod notify;
pub mod release;
pub mod server;
pub mod stamp;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PullshipError, PullshipResult};
