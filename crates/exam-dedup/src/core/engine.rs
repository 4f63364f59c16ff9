//! Single-input analysis pipeline.
//!
//! ```text
//! hinted stem + options -> content cache / store by content hash (hit -> return)
//! input -> cache key -> dedup cache (hit -> return)
//!                    -> fingerprint -> matcher against the store (hit -> return, cache it)
//!                    -> extraction -> content-hash recheck -> insert, cache it
//! ```
//!
//! The cache key is the SHA-256 of the image bytes (or of the normalized
//! text), so a cache hit never decodes the image or calls the embedding
//! provider.
//!
//! All collaborators are passed to [`DedupEngine::new`]; the engine holds no
//! global state and can be shared across threads behind an `Arc`.

use std::sync::Arc;

use crate::cache::{CachedAnalysis, DedupCache};
use crate::core::config::DedupConfig;
use crate::error::{DedupError, Result};
use crate::fingerprint::{FingerprintExtractor, content_hash};
use crate::matching::{MatchOutcome, SimilarityMatcher};
use crate::plugins::{ContentExtractor, EmbeddingProvider, Plugin};
use crate::store::QuestionStore;
use crate::types::{AnalysisHints, AnalysisInput, AnalysisResult, ExtractedContent, Fingerprint, MatchMethod, NewItem};

pub struct DedupEngine {
    config: DedupConfig,
    fingerprints: FingerprintExtractor,
    matcher: SimilarityMatcher,
    cache: DedupCache,
    store: Arc<dyn QuestionStore>,
    extractor: Arc<dyn ContentExtractor>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl DedupEngine {
    /// Build an engine and initialize its collaborators.
    ///
    /// Fails with `Validation` for an invalid config and `Plugin` when a
    /// collaborator refuses to initialize.
    pub fn new(
        config: DedupConfig,
        store: Arc<dyn QuestionStore>,
        extractor: Arc<dyn ContentExtractor>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;

        initialize_plugin(extractor.as_ref())?;
        initialize_plugin(embeddings.as_ref())?;

        tracing::debug!(
            extractor = extractor.name(),
            embeddings = embeddings.name(),
            cache_capacity = config.cache.capacity,
            "Dedup engine ready"
        );

        Ok(Self {
            fingerprints: FingerprintExtractor::new(Arc::clone(&embeddings)),
            matcher: SimilarityMatcher::new(config.matching.clone()),
            cache: DedupCache::from_config(&config.cache),
            config,
            store,
            extractor,
            embeddings,
        })
    }

    /// Analyze one input.
    ///
    /// Repeated inputs are answered from the cache; known questions are
    /// answered from the store; only unknown ones reach the extractor.
    /// Concurrent calls for the same input extract at most once.
    pub fn analyze(&self, input: &AnalysisInput, hints: &AnalysisHints) -> Result<AnalysisResult> {
        let digest = hints.content_digest();

        if hints.force_refresh {
            let fingerprint = self.fingerprints.extract(input, hints)?;
            let result = self.refresh(input, &fingerprint)?;
            if let Some(digest) = &digest {
                self.cache.invalidate(&content_key(digest));
            }
            return Ok(result);
        }

        if let Some(digest) = &digest
            && let Some(result) = self.lookup_content(digest)?
        {
            return Ok(result);
        }

        let Some(key) = FingerprintExtractor::cache_key_for(input) else {
            let fingerprint = self.fingerprints.extract(input, hints)?;
            return self.resolve(input, &fingerprint);
        };

        let mut fresh = None;
        let (cached, hit) = self.cache.get_or_try_compute(&key, || {
            let fingerprint = self.fingerprints.extract(input, hints)?;
            let result = self.resolve(input, &fingerprint)?;
            let cached = CachedAnalysis {
                item_id: result.id.clone(),
                content: result.content.clone(),
            };
            fresh = Some(result);
            Ok(cached)
        })?;

        if let Some(digest) = &digest {
            self.cache.put(&content_key(digest), cached.clone());
        }
        if !hit && let Some(result) = fresh {
            return Ok(result);
        }
        Ok(cache_hit(&key, cached))
    }

    /// Fingerprint without analyzing.
    pub fn fingerprint(&self, input: &AnalysisInput, hints: &AnalysisHints) -> Result<Fingerprint> {
        self.fingerprints.extract(input, hints)
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn QuestionStore> {
        &self.store
    }

    pub fn matcher(&self) -> &SimilarityMatcher {
        &self.matcher
    }

    /// Shut down collaborators. Both are shut down even if the first fails.
    pub fn shutdown(&self) -> Result<()> {
        let extractor = shutdown_plugin(self.extractor.as_ref());
        let embeddings = shutdown_plugin(self.embeddings.as_ref());
        extractor.and(embeddings)
    }

    /// Answer a client-extracted question from the cache or the store.
    fn lookup_content(&self, digest: &str) -> Result<Option<AnalysisResult>> {
        let key = content_key(digest);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Some(cache_hit(&key, cached)));
        }

        let Some(existing) = self.store.find_by_content_hash(digest)? else {
            return Ok(None);
        };
        tracing::info!(
            method = %MatchMethod::ContentHash,
            matched_id = %existing.id,
            "Client-extracted question matches a stored item"
        );
        self.cache.put(
            &key,
            CachedAnalysis {
                item_id: existing.id.clone(),
                content: existing.content.clone(),
            },
        );
        Ok(Some(AnalysisResult {
            id: existing.id.clone(),
            content: existing.content,
            from_cache: false,
            is_duplicate: true,
            similarity_score: Some(1.0),
            matched_id: Some(existing.id),
            method: Some(MatchMethod::ContentHash),
            cost: 0.0,
        }))
    }

    /// Store lookup, then extraction on a miss.
    fn resolve(&self, input: &AnalysisInput, fingerprint: &Fingerprint) -> Result<AnalysisResult> {
        match self.matcher.find_match(fingerprint, self.store.as_ref())? {
            Some(outcome) => Ok(store_hit(outcome)),
            None => self.compute(input, fingerprint),
        }
    }

    fn compute(&self, input: &AnalysisInput, fingerprint: &Fingerprint) -> Result<AnalysisResult> {
        let content = self.extract(input)?;
        let cost = content.cost();
        let digest = content_digest(&content);

        if !digest.is_empty()
            && let Some(existing) = self.store.find_by_content_hash(&digest)?
        {
            tracing::info!(
                method = %MatchMethod::ContentHash,
                matched_id = %existing.id,
                "Extracted content matches a stored item"
            );
            return Ok(AnalysisResult {
                id: existing.id.clone(),
                content: existing.content,
                from_cache: false,
                is_duplicate: true,
                similarity_score: Some(1.0),
                matched_id: Some(existing.id),
                method: Some(MatchMethod::ContentHash),
                cost,
            });
        }

        let id = self.store.insert(NewItem::new(fingerprint, content.clone(), digest))?;
        tracing::info!(item_id = %id, input = input.kind(), "Created new item");

        Ok(AnalysisResult {
            id,
            content,
            from_cache: false,
            is_duplicate: false,
            similarity_score: None,
            matched_id: None,
            method: None,
            cost,
        })
    }

    /// Re-extract a known question and replace its content under the same id.
    fn refresh(&self, input: &AnalysisInput, fingerprint: &Fingerprint) -> Result<AnalysisResult> {
        let result = match self.matcher.find_match(fingerprint, self.store.as_ref())? {
            Some(outcome) => {
                let content = self.extract(input)?;
                let cost = content.cost();
                let id = outcome.item.id;
                self.store.update_content(&id, content.clone(), content_digest(&content))?;
                tracing::info!(item_id = %id, "Refreshed stored content");

                AnalysisResult {
                    id: id.clone(),
                    content,
                    from_cache: false,
                    is_duplicate: true,
                    similarity_score: Some(outcome.similarity),
                    matched_id: Some(id),
                    method: Some(outcome.method),
                    cost,
                }
            }
            None => self.compute(input, fingerprint)?,
        };

        if let Some(key) = fingerprint.cache_key() {
            self.cache.put(
                &key,
                CachedAnalysis {
                    item_id: result.id.clone(),
                    content: result.content.clone(),
                },
            );
        }
        Ok(result)
    }

    fn extract(&self, input: &AnalysisInput) -> Result<ExtractedContent> {
        match input {
            AnalysisInput::Image(bytes) => self.extractor.extract_content(bytes),
            AnalysisInput::Text(text) => Ok(ExtractedContent::from_text(text.as_str())),
        }
    }
}

impl std::fmt::Debug for DedupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupEngine")
            .field("extractor", &self.extractor.name())
            .field("embeddings", &self.embeddings.name())
            .field("cache", &self.cache)
            .finish()
    }
}

fn initialize_plugin(plugin: &dyn Plugin) -> Result<()> {
    plugin.initialize().map_err(|e| match e {
        DedupError::Plugin { .. } => e,
        other => DedupError::plugin(plugin.name(), other.to_string()),
    })
}

fn shutdown_plugin(plugin: &dyn Plugin) -> Result<()> {
    plugin.shutdown().map_err(|e| {
        tracing::warn!(plugin = plugin.name(), error = %e, "Plugin shutdown failed");
        match e {
            DedupError::Plugin { .. } => e,
            other => DedupError::plugin(plugin.name(), other.to_string()),
        }
    })
}

/// Digest of extracted content; empty when there is nothing to identify it by.
fn content_digest(content: &ExtractedContent) -> String {
    if content.normalized_text.is_empty() && content.options.is_empty() {
        String::new()
    } else {
        content_hash(&content.normalized_text, &content.options)
    }
}

fn store_hit(outcome: MatchOutcome) -> AnalysisResult {
    let id = outcome.item.id;
    AnalysisResult {
        id: id.clone(),
        content: outcome.item.content,
        from_cache: false,
        is_duplicate: true,
        similarity_score: Some(outcome.similarity),
        matched_id: Some(id),
        method: Some(outcome.method),
        cost: 0.0,
    }
}

fn content_key(digest: &str) -> String {
    format!("content:{}", digest)
}

fn cache_hit(key: &str, cached: CachedAnalysis) -> AnalysisResult {
    let method = if key.starts_with("hash:") {
        MatchMethod::Exact
    } else if key.starts_with("content:") {
        MatchMethod::ContentHash
    } else {
        MatchMethod::Text
    };
    AnalysisResult {
        id: cached.item_id.clone(),
        content: cached.content,
        from_cache: true,
        is_duplicate: true,
        similarity_score: Some(1.0),
        matched_id: Some(cached.item_id),
        method: Some(method),
        cost: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::NoEmbeddings;
    use crate::store::MemoryStore;
    use crate::types::TokenUsage;
    use image::{DynamicImage, GrayImage, Luma};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExtractor {
        calls: AtomicUsize,
        text: String,
        fail_init: bool,
    }

    impl CountingExtractor {
        fn new(text: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                text: text.to_string(),
                fail_init: false,
            }
        }
    }

    impl Plugin for CountingExtractor {
        fn name(&self) -> &str {
            "counting"
        }

        fn initialize(&self) -> Result<()> {
            if self.fail_init {
                return Err(DedupError::Other("no credentials".to_string()));
            }
            Ok(())
        }
    }

    impl ContentExtractor for CountingExtractor {
        fn extract_content(&self, _image_bytes: &[u8]) -> Result<ExtractedContent> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut content = ExtractedContent::from_text(format!("{} v{}", self.text, n));
            content.options = vec!["A".to_string(), "B".to_string()];
            content.usage = Some(TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
                cost: 0.5,
            });
            Ok(content)
        }
    }

    fn engine_with(extractor: Arc<CountingExtractor>) -> DedupEngine {
        DedupEngine::new(
            DedupConfig::default(),
            Arc::new(MemoryStore::new()),
            extractor,
            Arc::new(NoEmbeddings),
        )
        .unwrap()
    }

    fn png(seed: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(48, 48, |x, y| Luma([((x * (seed + 2) + y * 7 + seed * 31) % 256) as u8]));
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_new_image_then_cache_hit() {
        let extractor = Arc::new(CountingExtractor::new("question"));
        let engine = engine_with(Arc::clone(&extractor));
        let input = AnalysisInput::image(png(1));

        let first = engine.analyze(&input, &AnalysisHints::default()).unwrap();
        assert!(!first.from_cache);
        assert!(!first.is_duplicate);
        assert_eq!(first.cost, 0.5);

        let second = engine.analyze(&input, &AnalysisHints::default()).unwrap();
        assert!(second.from_cache);
        assert!(second.is_duplicate);
        assert_eq!(second.similarity_score, Some(1.0));
        assert_eq!(second.matched_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(second.method, Some(MatchMethod::Exact));
        assert_eq!(second.cost, 0.0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_store_hit_after_cache_eviction() {
        let extractor = Arc::new(CountingExtractor::new("question"));
        let engine = engine_with(Arc::clone(&extractor));
        let input = AnalysisInput::image(png(1));

        let first = engine.analyze(&input, &AnalysisHints::default()).unwrap();
        engine.cache().clear();

        let second = engine.analyze(&input, &AnalysisHints::default()).unwrap();
        assert!(!second.from_cache);
        assert!(second.is_duplicate);
        assert_eq!(second.method, Some(MatchMethod::Exact));
        assert_eq!(second.id, first.id);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_text_input_never_calls_extractor() {
        let extractor = Arc::new(CountingExtractor::new("unused"));
        let engine = engine_with(Arc::clone(&extractor));
        let input = AnalysisInput::text("Which planet is closest to the sun?");

        let first = engine.analyze(&input, &AnalysisHints::default()).unwrap();
        assert!(!first.is_duplicate);
        assert_eq!(first.content.normalized_text, "whichplanetisclosesttothesun");

        let again = engine.analyze(&input, &AnalysisHints::default()).unwrap();
        assert!(again.from_cache);
        assert_eq!(again.method, Some(MatchMethod::Text));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_content_hash_recheck_reuses_existing_item() {
        let extractor = Arc::new(CountingExtractor::new("question"));
        let store: Arc<dyn QuestionStore> = Arc::new(MemoryStore::new());
        let engine = DedupEngine::new(
            DedupConfig::default(),
            Arc::clone(&store),
            extractor.clone(),
            Arc::new(NoEmbeddings),
        )
        .unwrap();
        let first = engine.analyze(&AnalysisInput::image(png(4)), &AnalysisHints::default()).unwrap();

        // Rewind the extractor so the next, visually unrelated image reads as the same question.
        extractor.calls.store(0, Ordering::SeqCst);
        let inverted = {
            let mut img = image::load_from_memory(&png(4)).unwrap();
            img.invert();
            let mut bytes = Vec::new();
            img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
            bytes
        };
        let second = engine.analyze(&AnalysisInput::image(inverted), &AnalysisHints::default()).unwrap();
        assert!(second.is_duplicate);
        assert_eq!(second.method, Some(MatchMethod::ContentHash));
        assert_eq!(second.matched_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(second.cost, 0.5);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_force_refresh_keeps_id() {
        let extractor = Arc::new(CountingExtractor::new("question"));
        let engine = engine_with(Arc::clone(&extractor));
        let input = AnalysisInput::image(png(5));

        let first = engine.analyze(&input, &AnalysisHints::default()).unwrap();
        let refreshed = engine.analyze(&input, &AnalysisHints::force_refresh()).unwrap();

        assert_eq!(refreshed.id, first.id);
        assert!(refreshed.is_duplicate);
        assert!(!refreshed.from_cache);
        assert_eq!(refreshed.content.raw_text, "question v1");
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);

        let stored = engine.store().get(&first.id).unwrap().unwrap();
        assert_eq!(stored.content.raw_text, "question v1");

        let cached = engine.analyze(&input, &AnalysisHints::default()).unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.content.raw_text, "question v1");
    }

    #[test]
    fn test_corrupt_image_is_extraction_error() {
        let extractor = Arc::new(CountingExtractor::new("question"));
        let engine = engine_with(Arc::clone(&extractor));
        let err = engine
            .analyze(&AnalysisInput::image(b"not an image".to_vec()), &AnalysisHints::default())
            .unwrap_err();
        assert!(matches!(err, DedupError::Extraction { .. }));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
        assert!(engine.store().is_empty().unwrap());
    }

    #[test]
    fn test_plugin_initialize_failure() {
        let extractor = Arc::new(CountingExtractor {
            fail_init: true,
            ..CountingExtractor::new("x")
        });
        let err = DedupEngine::new(
            DedupConfig::default(),
            Arc::new(MemoryStore::new()),
            extractor,
            Arc::new(NoEmbeddings),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Plugin error in 'counting': no credentials");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = DedupConfig::default();
        config.cache.capacity = 0;
        let result = DedupEngine::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(CountingExtractor::new("x")),
            Arc::new(NoEmbeddings),
        );
        assert!(matches!(result.unwrap_err(), DedupError::Validation { .. }));
    }

    #[test]
    fn test_shutdown() {
        let engine = engine_with(Arc::new(CountingExtractor::new("x")));
        assert!(engine.shutdown().is_ok());
    }
}
