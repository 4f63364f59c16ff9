//! Second pass over a finished batch: flags items that repeat an earlier item
//! of the same batch.

use super::BatchItemResult;
use crate::fingerprint::similarity_ratio;

/// Mark later duplicates among successful results, in index order.
///
/// Each successful item is compared with every earlier successful item by
/// normalized-text ratio; the first earlier item reaching `threshold` becomes
/// its `duplicate_of_index`. Texts shorter than `min_chars` are never compared.
/// `results` must already be sorted by index. Returns the number of items marked.
pub fn mark_batch_duplicates(results: &mut [BatchItemResult], threshold: f64, min_chars: usize) -> usize {
    let mut marked = 0;

    for i in 0..results.len() {
        let Some(text) = comparable_text(&results[i], min_chars) else {
            continue;
        };

        let hit = results[..i].iter().find_map(|earlier| {
            let earlier_text = comparable_text(earlier, min_chars)?;
            let ratio = similarity_ratio(text, earlier_text);
            (ratio >= threshold).then_some((earlier.index, ratio))
        });

        if let Some((index, ratio)) = hit {
            tracing::debug!(
                index = results[i].index,
                duplicate_of = index,
                similarity = ratio,
                "Batch duplicate"
            );
            let item = &mut results[i];
            item.is_batch_duplicate = true;
            item.duplicate_of_index = Some(index);
            item.duplicate_similarity = Some(ratio);
            marked += 1;
        }
    }

    marked
}

fn comparable_text(result: &BatchItemResult, min_chars: usize) -> Option<&str> {
    if !result.success {
        return None;
    }
    let text = result.analysis.as_ref()?.content.normalized_text.as_str();
    (text.chars().count() >= min_chars).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisResult, ExtractedContent};

    fn ok(index: usize, text: &str) -> BatchItemResult {
        BatchItemResult::succeeded(
            index,
            AnalysisResult {
                id: format!("id-{}", index),
                content: ExtractedContent::from_text(text),
                from_cache: false,
                is_duplicate: false,
                similarity_score: None,
                matched_id: None,
                method: None,
                cost: 0.0,
            },
            0.0,
        )
    }

    #[test]
    fn test_marks_later_item_only() {
        let mut results = vec![
            ok(0, "Which of the following numbers is prime?"),
            ok(1, "Name the capital city of Australia."),
            ok(2, "Which of the following numbers is prime"),
        ];
        assert_eq!(mark_batch_duplicates(&mut results, 0.85, 10), 1);

        assert!(!results[0].is_batch_duplicate);
        assert!(!results[1].is_batch_duplicate);
        assert!(results[2].is_batch_duplicate);
        assert_eq!(results[2].duplicate_of_index, Some(0));
        assert_eq!(results[2].duplicate_similarity, Some(1.0));
    }

    #[test]
    fn test_first_match_wins_not_best() {
        let mut results = vec![
            ok(0, "the quick brown fox jumps over the lazy dog"),
            ok(1, "the quick brown fox jumps over the lazy dogs"),
            ok(2, "the quick brown fox jumps over the lazy dogs"),
        ];
        mark_batch_duplicates(&mut results, 0.85, 10);
        // Item 2 equals item 1 exactly, but item 0 is earlier and already above threshold.
        assert_eq!(results[2].duplicate_of_index, Some(0));
        assert_eq!(results[1].duplicate_of_index, Some(0));
    }

    #[test]
    fn test_failures_and_short_texts_are_ignored() {
        let mut results = vec![
            BatchItemResult::failed(0, "boom".to_string(), 0.0),
            ok(1, "Short?"),
            ok(2, "Short!"),
            ok(3, "Explain the water cycle in detail."),
        ];
        assert_eq!(mark_batch_duplicates(&mut results, 0.85, 10), 0);
        assert!(results.iter().all(|r| !r.is_batch_duplicate));
    }

    #[test]
    fn test_empty_batch() {
        let mut results: Vec<BatchItemResult> = vec![];
        assert_eq!(mark_batch_duplicates(&mut results, 0.85, 10), 0);
    }
}
