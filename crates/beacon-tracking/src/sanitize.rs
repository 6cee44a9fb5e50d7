//! Property key sanitizing.
//!
//! Keys keep only ASCII letters, digits and underscores. Values are never
//! touched. A key that sanitizes to nothing is dropped, and when two keys
//! collide the one sorting last wins.

use beacon_core::Properties;
use tracing::debug;

/// Strips every character that is not an ASCII letter, digit or underscore.
///
/// ```
/// use beacon_tracking::sanitize::sanitize_key;
///
/// assert_eq!(sanitize_key("bad key!"), "badkey");
/// assert_eq!(sanitize_key("valid_1"), "valid_1");
/// ```
pub fn sanitize_key(key: &str) -> String {
    key.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect()
}

/// Whether `key` is already in sanitized form.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Sanitizes every key of `properties`.
pub fn sanitize_properties(properties: Properties) -> Properties {
    let mut sanitized = Properties::new();
    for (key, value) in properties {
        if is_valid_key(&key) {
            sanitized.insert(key, value);
            continue;
        }
        let clean = sanitize_key(&key);
        if clean.is_empty() {
            debug!(key = %key, "dropping property with no usable key characters");
            continue;
        }
        debug!(key = %key, sanitized = %clean, "sanitized property key");
        sanitized.insert(clean, value);
    }
    sanitized
}
