//! Host and time stamps attached to deploys

use chrono::{DateTime, Utc};
use tracing::debug;

/// Compact sortable UTC timestamp, e.g. `20230101T000000Z`
///
/// Names deployment slots and shipping records.
pub fn compact_utc(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Lower-cased local hostname, `unknown` if it cannot be read
pub fn hostname() -> String {
    let name = match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().trim().to_lowercase(),
        Err(e) => {
            debug!("Failed to read hostname: {}", e);
            String::new()
        }
    };

    if name.is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}
