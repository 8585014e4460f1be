//! Reading-order keys for uploaded images.
//!
//! Screenshots usually carry a sequence number in their file name
//! (`0001_x.jpg`, `shot-12.png`). The key is the longest digit run of the
//! final path segment; references without any digit get a stable hash so the
//! order is still repeatable, just not meaningful.

use sha2::{Digest, Sha256};

use crate::job::ImageRef;

/// Digit runs longer than this keep only their trailing digits.
pub const MAX_SEQUENCE_DIGITS: usize = 18;

/// Sort key for an [`ImageRef`]. Every `Sequence` key sorts before every
/// `Hashed` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OrderingKey {
    Sequence(u64),
    Hashed(u64),
}

pub fn ordering_key(image: &ImageRef) -> OrderingKey {
    match longest_digit_run(image.file_name()) {
        Some(digits) => OrderingKey::Sequence(parse_clamped(digits)),
        None => OrderingKey::Hashed(stable_hash(image.as_str())),
    }
}

/// Stable sort by ordering key; equal keys keep arrival order.
pub fn sort_by_ordering_key(mut images: Vec<ImageRef>) -> Vec<ImageRef> {
    images.sort_by_cached_key(ordering_key);
    images
}

/// First of the longest runs of ASCII digits, if any.
fn longest_digit_run(segment: &str) -> Option<&str> {
    let bytes = segment.as_bytes();
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;

    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let len = i - start;
        if best.map_or(true, |(_, best_len)| len > best_len) {
            best = Some((start, len));
        }
    }

    best.map(|(start, len)| &segment[start..start + len])
}

fn parse_clamped(digits: &str) -> u64 {
    let tail = &digits[digits.len().saturating_sub(MAX_SEQUENCE_DIGITS)..];
    tail.bytes()
        .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'))
}

fn stable_hash(reference: &str) -> u64 {
    let digest = Sha256::digest(reference.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
