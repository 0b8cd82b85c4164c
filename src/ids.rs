//! Store-assigned identifiers.
//!
//! An id is a 24-character lowercase hex token: an 8-hex-digit creation
//! timestamp followed by 8 random bytes. The timestamp prefix makes the
//! store's key order approximate creation order. Format validity is a
//! separate question from existence; [`is_valid`] answers the former only.

use chrono::Utc;
use std::fmt::Write;
use uuid::Uuid;

/// Length of every identifier, in characters.
pub const ID_LEN: usize = 24;

/// Generate a fresh identifier.
pub fn generate() -> String {
    let secs = Utc::now().timestamp() as u32;
    let tail = Uuid::new_v4();

    let mut id = String::with_capacity(ID_LEN);
    // Infallible for String targets.
    let _ = write!(id, "{secs:08x}");
    for byte in &tail.as_bytes()[..8] {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

/// Whether `id` is syntactically a valid identifier.
///
/// Accepts both hex cases, matching the format predicate of the upstream
/// document stores this API models.
pub fn is_valid(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_and_unique() {
        let a = generate();
        let b = generate();
        assert!(is_valid(&a));
        assert!(is_valid(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_valid(""));
        assert!(!is_valid("bad-id"));
        assert!(!is_valid("0123456789abcdef0123456")); // 23 chars
        assert!(!is_valid("0123456789abcdef012345678")); // 25 chars
        assert!(!is_valid("0123456789abcdef0123456g")); // non-hex
    }

    #[test]
    fn accepts_uppercase_hex() {
        assert!(is_valid("0123456789ABCDEF01234567"));
    }
}
