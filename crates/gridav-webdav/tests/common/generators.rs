//! Test data generators for WebDAV integration tests.

use rand::Rng;

/// Generate random bytes of specified size.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    rand::rng().fill(&mut data[..]);
    data
}

/// Generate content containing all 256 possible byte values.
pub fn all_byte_values() -> Vec<u8> {
    (0u8..=255).collect()
}

/// A filename with characters that need percent-encoding.
pub fn special_filename() -> String {
    "file with spaces & (special) chars!.txt".to_string()
}

pub fn unicode_filename() -> String {
    "файл-αβγ-日本.txt".to_string()
}

/// A nested path like "/d0/d1/d2" with `depth` levels.
pub fn deep_path(depth: usize) -> String {
    (0..depth).map(|i| format!("/d{i}")).collect()
}
