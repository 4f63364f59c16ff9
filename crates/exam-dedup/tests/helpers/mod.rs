//! Shared fixtures for integration tests.
#![allow(dead_code)]

use exam_dedup::fingerprint::sha256_hex;
use exam_dedup::plugins::{ContentExtractor, EmbeddingProvider, NoEmbeddings, Plugin};
use exam_dedup::{DedupConfig, DedupEngine, DedupError, ExtractedContent, MemoryStore, Result, TokenUsage};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

type DelayFn = Box<dyn Fn(&[u8]) -> Duration + Send + Sync>;

/// Extractor that counts calls and answers with text derived from the image bytes.
pub struct MockExtractor {
    calls: AtomicUsize,
    delay: Option<DelayFn>,
    fail_on: Vec<Vec<u8>>,
    cost: f64,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: None,
            fail_on: Vec::new(),
            cost: 0.01,
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_fn(move |_| delay)
    }

    pub fn with_delay_fn(mut self, delay: impl Fn(&[u8]) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn failing_on(mut self, bytes: &[u8]) -> Self {
        self.fail_on.push(bytes.to_vec());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The text this extractor returns for `bytes`.
    pub fn text_for(bytes: &[u8]) -> String {
        format!("Question {}", &sha256_hex(bytes)[..16])
    }
}

impl Plugin for MockExtractor {
    fn name(&self) -> &str {
        "mock-extractor"
    }
}

impl ContentExtractor for MockExtractor {
    fn extract_content(&self, image_bytes: &[u8]) -> Result<ExtractedContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = &self.delay {
            thread::sleep(delay(image_bytes));
        }
        if self.fail_on.iter().any(|b| b == image_bytes) {
            return Err(DedupError::extraction("mock extraction failure"));
        }

        let mut content = ExtractedContent::from_text(Self::text_for(image_bytes));
        content.options = vec!["A. 1".to_string(), "B. 2".to_string()];
        content.usage = Some(TokenUsage {
            input_tokens: 200,
            output_tokens: 40,
            cost: self.cost,
        });
        Ok(content)
    }
}

/// Embedding provider returning the same vector for every image.
pub struct ConstantEmbeddings(pub Vec<f32>);

impl Plugin for ConstantEmbeddings {
    fn name(&self) -> &str {
        "constant-embeddings"
    }
}

impl EmbeddingProvider for ConstantEmbeddings {
    fn extract_embedding(&self, _image_bytes: &[u8]) -> Option<Vec<f32>> {
        Some(self.0.clone())
    }
}

/// Embedding provider that counts calls and derives a vector from the bytes.
pub struct CountingEmbeddings {
    calls: AtomicUsize,
}

impl CountingEmbeddings {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Plugin for CountingEmbeddings {
    fn name(&self) -> &str {
        "counting-embeddings"
    }
}

impl EmbeddingProvider for CountingEmbeddings {
    fn extract_embedding(&self, image_bytes: &[u8]) -> Option<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let digest = sha256_hex(image_bytes);
        Some(digest.bytes().take(8).map(|b| f32::from(b) - 75.0).collect())
    }
}

/// Route library logs to the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine(extractor: Arc<MockExtractor>) -> DedupEngine {
    engine_with(DedupConfig::default(), extractor, Arc::new(NoEmbeddings))
}

pub fn engine_with(
    config: DedupConfig,
    extractor: Arc<dyn ContentExtractor>,
    embeddings: Arc<dyn EmbeddingProvider>,
) -> DedupEngine {
    DedupEngine::new(config, Arc::new(MemoryStore::new()), extractor, embeddings).expect("engine should build")
}

/// Smooth grayscale test card; distinct seeds give unrelated hashes.
pub fn pattern(seed: u32, shift: i16) -> DynamicImage {
    let s = seed as f64;
    let img = GrayImage::from_fn(64, 64, |x, y| {
        let (x, y) = (x as f64 / 64.0, y as f64 / 64.0);
        let tau = std::f64::consts::TAU;
        let v = 128.0
            + 35.0 * (tau * ((1.0 + s % 3.0) * x + 0.5 * y) + s).sin()
            + 25.0 * (tau * (0.7 * x - (1.0 + s % 2.0) * y) + 2.0 * s).cos()
            + 20.0 * (tau * (2.0 * x + 1.5 * y) + 0.3 * s).sin();
        Luma([(v as i16 + shift).clamp(0, 255) as u8])
    });
    DynamicImage::ImageLuma8(img)
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encoding should succeed");
    bytes
}

pub fn png(seed: u32) -> Vec<u8> {
    encode(&pattern(seed, 0), ImageFormat::Png)
}

/// Same picture as `png(seed)` brightened by `shift`, stored as RGB BMP.
pub fn brightened_bmp(seed: u32, shift: i16) -> Vec<u8> {
    let rgb = DynamicImage::ImageRgb8(pattern(seed, shift).to_rgb8());
    encode(&rgb, ImageFormat::Bmp)
}

pub fn inverted_png(seed: u32) -> Vec<u8> {
    let mut image = pattern(seed, 0);
    image.invert();
    encode(&image, ImageFormat::Png)
}
