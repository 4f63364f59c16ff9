//! End-to-end analysis scenarios through the full engine.

use exam_dedup::{AnalysisHints, AnalysisInput, DedupConfig, MatchMethod};
use std::sync::Arc;

mod helpers;

use helpers::{
    ConstantEmbeddings, CountingEmbeddings, MockExtractor, brightened_bmp, engine, engine_with, inverted_png, png,
};

#[test]
fn test_new_cached_near_duplicate_and_unrelated() {
    helpers::init_tracing();
    let extractor = Arc::new(MockExtractor::new());
    let engine = engine(Arc::clone(&extractor));
    let hints = AnalysisHints::default();

    let img1 = AnalysisInput::image(png(4));
    let first = engine.analyze(&img1, &hints).unwrap();
    assert!(!first.from_cache);
    assert!(!first.is_duplicate);
    assert_eq!(extractor.calls(), 1);

    let again = engine.analyze(&img1, &hints).unwrap();
    assert!(again.from_cache);
    assert!(again.is_duplicate);
    assert_eq!(again.id, first.id);
    assert_eq!(again.similarity_score, Some(1.0));
    assert_eq!(again.content, first.content);

    let near = engine
        .analyze(&AnalysisInput::image(brightened_bmp(4, 10)), &hints)
        .unwrap();
    assert!(near.is_duplicate, "re-encoded, brightened copy should match");
    assert!(!near.from_cache);
    assert_eq!(near.method, Some(MatchMethod::Perceptual));
    assert_eq!(near.matched_id.as_deref(), Some(first.id.as_str()));
    assert!(near.similarity_score.unwrap() >= 1.0 - 5.0 / 64.0);

    let inverted = engine.analyze(&AnalysisInput::image(inverted_png(4)), &hints).unwrap();
    assert!(!inverted.is_duplicate);
    assert_ne!(inverted.id, first.id);

    let unrelated = engine.analyze(&AnalysisInput::image(png(1)), &hints).unwrap();
    assert!(!unrelated.is_duplicate, "a different picture must not match");
    assert_ne!(unrelated.id, first.id);
    assert_ne!(unrelated.id, inverted.id);

    assert_eq!(extractor.calls(), 3);
    assert_eq!(engine.store().len().unwrap(), 3);
}

#[test]
fn test_cache_hit_skips_fingerprinting() {
    let extractor = Arc::new(MockExtractor::new());
    let embeddings = Arc::new(CountingEmbeddings::new());
    let engine = engine_with(DedupConfig::default(), extractor.clone(), embeddings.clone());
    let input = AnalysisInput::image(png(6));
    let hints = AnalysisHints::default();

    let first = engine.analyze(&input, &hints).unwrap();
    assert_eq!(embeddings.calls(), 1);

    for _ in 0..3 {
        let again = engine.analyze(&input, &hints).unwrap();
        assert!(again.from_cache);
        assert_eq!(again.id, first.id);
    }
    assert_eq!(embeddings.calls(), 1);
    assert_eq!(extractor.calls(), 1);
}

#[test]
fn test_client_extracted_question_skips_extraction() {
    let extractor = Arc::new(MockExtractor::new());
    let engine = engine(Arc::clone(&extractor));
    let original = png(2);

    let first = engine
        .analyze(&AnalysisInput::image(original.clone()), &AnalysisHints::default())
        .unwrap();
    assert_eq!(extractor.calls(), 1);

    // Same stem and options, photographed differently.
    let hints = AnalysisHints::with_question(MockExtractor::text_for(&original), ["B. 2", "A. 1"]);
    let from_store = engine.analyze(&AnalysisInput::image(inverted_png(9)), &hints).unwrap();
    assert!(from_store.is_duplicate);
    assert!(!from_store.from_cache);
    assert_eq!(from_store.method, Some(MatchMethod::ContentHash));
    assert_eq!(from_store.matched_id.as_deref(), Some(first.id.as_str()));
    assert_eq!(from_store.cost, 0.0);

    let repeat = engine.analyze(&AnalysisInput::image(png(5)), &hints).unwrap();
    assert!(repeat.from_cache);
    assert_eq!(repeat.method, Some(MatchMethod::ContentHash));
    assert_eq!(repeat.id, first.id);

    assert_eq!(extractor.calls(), 1);
    assert_eq!(engine.store().len().unwrap(), 1);
}

#[test]
fn test_unknown_client_question_is_extracted_once() {
    let extractor = Arc::new(MockExtractor::new());
    let engine = engine(Arc::clone(&extractor));
    let hints = AnalysisHints::with_question("Which gas do plants absorb?", ["A. Oxygen", "B. Carbon dioxide"]);

    let first = engine.analyze(&AnalysisInput::image(png(3)), &hints).unwrap();
    assert!(!first.is_duplicate);
    assert_eq!(extractor.calls(), 1);

    let again = engine.analyze(&AnalysisInput::image(inverted_png(8)), &hints).unwrap();
    assert!(again.from_cache);
    assert_eq!(again.method, Some(MatchMethod::ContentHash));
    assert_eq!(again.id, first.id);
    assert_eq!(extractor.calls(), 1);
}

#[test]
fn test_idempotent_analysis_extracts_once() {
    let extractor = Arc::new(MockExtractor::new());
    let engine = engine(Arc::clone(&extractor));
    let input = AnalysisInput::image(png(7));

    let ids: Vec<String> = (0..5)
        .map(|_| engine.analyze(&input, &AnalysisHints::default()).unwrap().id)
        .collect();

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(extractor.calls(), 1);
    assert_eq!(engine.cache().stats().hits, 4);
}

#[test]
fn test_store_answers_after_cache_eviction() {
    let mut config = DedupConfig::default();
    config.cache.capacity = 1;
    let extractor = Arc::new(MockExtractor::new());
    let engine = engine_with(config, extractor.clone(), Arc::new(exam_dedup::plugins::NoEmbeddings));
    let hints = AnalysisHints::default();

    let a = AnalysisInput::image(png(1));
    let first = engine.analyze(&a, &hints).unwrap();
    engine.analyze(&AnalysisInput::text("An unrelated question about tectonic plates"), &hints)
        .unwrap();
    assert_eq!(engine.cache().stats().evictions, 1);

    let again = engine.analyze(&a, &hints).unwrap();
    assert!(!again.from_cache);
    assert!(again.is_duplicate);
    assert_eq!(again.method, Some(MatchMethod::Exact));
    assert_eq!(again.id, first.id);
    assert_eq!(again.cost, 0.0);
    assert_eq!(extractor.calls(), 1);
}

#[test]
fn test_embedding_match_beats_distant_hash() {
    let extractor = Arc::new(MockExtractor::new());
    let engine = engine_with(
        DedupConfig::default(),
        extractor.clone(),
        Arc::new(ConstantEmbeddings(vec![0.6, 0.8, 0.0])),
    );
    let hints = AnalysisHints::default();

    let first = engine.analyze(&AnalysisInput::image(png(4)), &hints).unwrap();
    let other = engine.analyze(&AnalysisInput::image(inverted_png(4)), &hints).unwrap();

    assert!(other.is_duplicate);
    assert_eq!(other.method, Some(MatchMethod::Embedding));
    assert_eq!(other.matched_id.as_deref(), Some(first.id.as_str()));
    assert!((other.similarity_score.unwrap() - 1.0).abs() < 1e-6);
    assert_eq!(extractor.calls(), 1);
}

#[test]
fn test_client_text_hint_enables_text_fallback() {
    let extractor = Arc::new(MockExtractor::new());
    let engine = engine(Arc::clone(&extractor));

    let question = "Which organelle is known as the powerhouse of the cell?";
    let first = engine
        .analyze(&AnalysisInput::image(png(2)), &AnalysisHints::with_raw_text(question))
        .unwrap();

    let retyped = engine
        .analyze(
            &AnalysisInput::image(inverted_png(9)),
            &AnalysisHints::with_raw_text("Which organelle is known as the powerhouse of the cell"),
        )
        .unwrap();

    assert!(retyped.is_duplicate);
    assert_eq!(retyped.method, Some(MatchMethod::Text));
    assert_eq!(retyped.matched_id.as_deref(), Some(first.id.as_str()));
    assert_eq!(extractor.calls(), 1);
}

#[test]
fn test_text_inputs_never_reach_the_extractor() {
    let extractor = Arc::new(MockExtractor::new());
    let engine = engine(Arc::clone(&extractor));
    let hints = AnalysisHints::default();

    let first = engine
        .analyze(&AnalysisInput::text("What is the chemical symbol for gold?"), &hints)
        .unwrap();
    let second = engine
        .analyze(&AnalysisInput::text("what is the chemical symbol for GOLD"), &hints)
        .unwrap();

    assert_eq!(second.id, first.id);
    assert!(second.from_cache);
    assert_eq!(second.method, Some(MatchMethod::Text));
    assert_eq!(extractor.calls(), 0);
}

#[test]
fn test_extraction_failure_is_reported_and_not_cached() {
    let bad = png(3);
    let extractor = Arc::new(MockExtractor::new().failing_on(&bad));
    let engine = engine(Arc::clone(&extractor));
    let input = AnalysisInput::image(bad);

    assert!(engine.analyze(&input, &AnalysisHints::default()).is_err());
    assert!(engine.analyze(&input, &AnalysisHints::default()).is_err());
    assert_eq!(extractor.calls(), 2);
    assert!(engine.store().is_empty().unwrap());
    assert!(engine.cache().is_empty());
}
