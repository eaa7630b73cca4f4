// src/data_gen.rs
//
// Random payloads and resource names for fixtures and upload workloads.
//
// Payloads are random (not zero-filled) so that backends with deduplication
// or compression cannot shortcut the transfer.

use bytes::Bytes;
use rand::distr::Alphanumeric;
use rand::{rng, Rng, RngCore};

/// Generate `size` bytes of random content.
pub fn random_content(size: u64) -> Bytes {
    let mut buf = vec![0u8; size as usize];
    rng().fill_bytes(&mut buf);
    Bytes::from(buf)
}

/// Build a random lowercase name of exactly `size` characters (prefix and
/// suffix included, truncated on a char boundary when they exceed it).
///
/// Bucket names on most backends must be lowercase alphanumerics, so the
/// random part never contains anything else.
pub fn random_name(size: usize, prefix: Option<&str>, suffix: Option<&str>) -> String {
    let prefix = prefix.unwrap_or("");
    let suffix = suffix.unwrap_or("");
    let fill = size.saturating_sub(prefix.chars().count() + suffix.chars().count());

    let random: String = rng()
        .sample_iter(&Alphanumeric)
        .take(fill)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();

    format!("{prefix}{random}{suffix}")
        .chars()
        .take(size.max(1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_content_size() {
        assert_eq!(random_content(0).len(), 0);
        assert_eq!(random_content(4096).len(), 4096);
    }

    #[test]
    fn test_random_name_length_and_affixes() {
        let name = random_name(30, Some("osb-"), Some("-x"));
        assert_eq!(name.len(), 30);
        assert!(name.starts_with("osb-"));
        assert!(name.ends_with("-x"));
        assert!(name.chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_random_name_truncates_long_prefix() {
        let name = random_name(4, Some("abcdefgh"), None);
        assert_eq!(name, "abcd");
    }

    #[test]
    fn test_random_name_multibyte_prefix() {
        let prefix = format!("a{}", "é".repeat(15));
        let name = random_name(10, Some(&prefix), None);
        assert_eq!(name.chars().count(), 10);
        assert!(prefix.starts_with(&name));

        let name = random_name(20, Some("ü-"), None);
        assert_eq!(name.chars().count(), 20);
        assert!(name.starts_with("ü-"));
    }

    #[test]
    fn test_random_names_differ() {
        assert_ne!(random_name(30, None, None), random_name(30, None, None));
    }
}
