//! Checksum calculation for migration content

use sha2::{Digest, Sha256};

/// Calculate the SHA-256 checksum of migration content
///
/// The fragments are hashed in order as if concatenated, so the same fragments
/// always give the same 64-character lowercase hex digest.
///
/// # Example
///
/// ```
/// use lockstep::migration::calculate_checksum;
///
/// let sum = calculate_checksum(&["CREATE TABLE users (id INT)", "DROP TABLE users"]);
/// assert_eq!(sum.len(), 64);
/// ```
#[must_use]
pub fn calculate_checksum(fragments: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for fragment in fragments {
        hasher.update(fragment.as_bytes());
    }
    let hash = hasher.finalize();

    format!("{:x}", hash)
}
