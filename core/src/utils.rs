//! Small utility functions shared across the dispatch service, following
//! the teacher's `shared::utils` module: one focused function per concern,
//! tested in isolation.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use rand::RngCore;

use crate::error::{CoreError, Result};

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// A short, URL-safe random id suitable for trace/span ids. Not a UUID —
/// just enough entropy to make a trace chain distinguishable in logs.
pub fn new_trace_id() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Validates a callback server's scheme/host before it's registered,
/// rejecting embedded credentials the way `shared::utils::validate_url`
/// does.
pub fn validate_route_address(scheme: &str, host: &str, port: u16) -> Result<()> {
    if scheme != "http" && scheme != "https" {
        return Err(CoreError::ArgsInvalid(format!(
            "unsupported scheme: {scheme}"
        )));
    }
    if host.trim().is_empty() {
        return Err(CoreError::ArgsInvalid("host must not be empty".into()));
    }
    if host.contains('@') {
        return Err(CoreError::ArgsInvalid(
            "host must not contain embedded credentials".into(),
        ));
    }
    if port == 0 {
        return Err(CoreError::ArgsInvalid("port must not be zero".into()));
    }
    Ok(())
}

/// Exponential backoff in seconds, capped, for retry-oriented callers
/// (mirrors `shared::utils::calculate_backoff_delay`).
pub fn calculate_backoff_delay(attempt: u32, base_secs: u64, cap_secs: u64) -> u64 {
    let delay = base_secs.saturating_mul(1u64 << attempt.min(16));
    delay.min(cap_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_ids_are_unique() {
        let a = new_trace_id();
        let b = new_trace_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn validate_route_address_rejects_bad_scheme() {
        assert!(validate_route_address("ftp", "host", 80).is_err());
    }

    #[test]
    fn validate_route_address_rejects_credentials() {
        assert!(validate_route_address("http", "user@host", 80).is_err());
    }

    #[test]
    fn validate_route_address_accepts_valid_input() {
        assert!(validate_route_address("https", "example.com", 443).is_ok());
    }

    #[test]
    fn backoff_delay_caps() {
        assert_eq!(calculate_backoff_delay(0, 1, 60), 1);
        assert_eq!(calculate_backoff_delay(10, 1, 60), 60);
    }
}
