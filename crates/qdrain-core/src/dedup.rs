//! Deduplication ids for messages submitted to ordered queues.

use uuid::Uuid;

/// Mints a fresh deduplication id.
///
/// A random (version 4, RFC 4122 variant) UUID drawn from the operating
/// system's CSPRNG, rendered as 32 hyphenless hex digits.
pub fn new_deduplication_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Mints a deduplication id that differs from `previous`.
pub fn fresh_deduplication_id(previous: Option<&str>) -> String {
    loop {
        let id = new_deduplication_id();
        if previous != Some(id.as_str()) {
            return id;
        }
    }
}
