//! Tag derivation for backends
//!
//! Backends are free to pick what a tag means; these helpers give the bundled
//! backends short, stable, hex-encoded tags.

/// Content tag from a modification time and a size.
pub fn metadata_content_tag(modified_nanos: u128, size: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&modified_nanos.to_le_bytes());
    hasher.update(&size.to_le_bytes());
    short_hex(hasher.finalize())
}

/// Content tag from the bytes themselves.
pub fn bytes_content_tag(bytes: &[u8]) -> String {
    short_hex(blake3::hash(bytes))
}

fn short_hex(hash: blake3::Hash) -> String {
    hex::encode(&hash.as_bytes()[..16])
}
