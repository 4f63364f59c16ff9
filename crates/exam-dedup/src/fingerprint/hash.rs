use sha2::{Digest, Sha256};

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digest identifying a question by its meaning rather than its pixels.
///
/// Covers the normalized question text plus the trimmed options, sorted so
/// that reordered choices hash identically.
pub fn content_hash(normalized_text: &str, options: &[String]) -> String {
    let mut sorted: Vec<&str> = options.iter().map(|o| o.trim()).filter(|o| !o.is_empty()).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hasher.update(b"|");
    hasher.update(sorted.join("|").as_bytes());
    hex::encode(hasher.finalize())
}
