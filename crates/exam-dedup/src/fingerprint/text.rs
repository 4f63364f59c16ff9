//! Text normalization and similarity ratio.

/// Lowercase `text` and keep only alphanumeric characters.
///
/// Whitespace, punctuation and symbols are dropped, so OCR noise such as
/// extra spaces or a misread comma does not break comparison. CJK characters
/// are alphanumeric and are kept.
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Similarity ratio `2 * M / (|a| + |b|)` where `M` is the length of the
/// longest common subsequence of the two character sequences.
///
/// Returns a value in `[0, 1]`; two empty strings are identical (1.0).
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (long, short) = if a.len() >= b.len() { (&a, &b) } else { (&b, &a) };
    let mut prev = vec![0usize; short.len() + 1];
    let mut curr = vec![0usize; short.len() + 1];
    for lc in long.iter() {
        for (j, sc) in short.iter().enumerate() {
            curr[j + 1] = if lc == sc {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let matched = prev[short.len()];

    (2 * matched) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_whitespace_and_punctuation() {
        assert_eq!(normalize_text("  What is 2 + 2?\n"), "whatis22");
        assert_eq!(normalize_text("A) Paris, B) Rome."), "aparisbrome");
    }

    #[test]
    fn test_normalize_keeps_cjk() {
        assert_eq!(normalize_text("下列哪个是质数？ A. 4"), "下列哪个是质数a4");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize_text(" \t.,!"), "");
    }

    #[test]
    fn test_ratio_identical() {
        assert_eq!(similarity_ratio("abcdef", "abcdef"), 1.0);
        assert_eq!(similarity_ratio("", ""), 1.0);
    }

    #[test]
    fn test_ratio_disjoint() {
        assert_eq!(similarity_ratio("abc", "xyz"), 0.0);
        assert_eq!(similarity_ratio("abc", ""), 0.0);
    }

    #[test]
    fn test_ratio_partial() {
        // LCS("abcd", "abed") = "abd" -> 2*3/8
        assert!((similarity_ratio("abcd", "abed") - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_symmetric() {
        let a = "whichofthefollowingisprime";
        let b = "whichofthefolowingisprim";
        assert_eq!(similarity_ratio(a, b), similarity_ratio(b, a));
        assert!(similarity_ratio(a, b) > 0.95);
    }

    #[test]
    fn test_ratio_single_char_noise_stays_above_threshold() {
        let a = normalize_text("Calculate the area of a circle with radius 3 cm.");
        let b = normalize_text("Calcu1ate the area of a circle with radius 3cm");
        assert!(similarity_ratio(&a, &b) >= 0.85);
    }
}
