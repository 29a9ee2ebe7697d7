//! Content fingerprinting.
//!
//! Checksums are taken over normalized content (BOM stripped, CRLF replaced
//! by LF) so that the same script hashes identically regardless of the
//! platform it was written on. Raw bytes are never hashed.

use sha2::{Digest, Sha256};

/// Decode raw file bytes into normalized script text: strips a leading
/// UTF-8 BOM and replaces every CRLF with LF.
pub fn normalize_content(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    text.replace("\r\n", "\n")
}

/// Lowercase hex SHA-256 of normalized script text, 64 characters.
pub fn checksum_of(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Normalize and checksum in one step.
pub fn checksum_bytes(raw: &[u8]) -> String {
    checksum_of(&normalize_content(raw))
}
