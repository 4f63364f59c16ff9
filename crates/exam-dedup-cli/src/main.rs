//! exam-dedup command-line front end.
//!
//! Fingerprints, pairwise comparisons and one-shot batch dedup runs over
//! local files. Results go to stdout as JSON; logs go to stderr.

use ahash::AHashMap;
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use exam_dedup::fingerprint::{normalize_text, perceptual_hash_bytes, sha256_hex, similarity_ratio};
use exam_dedup::plugins::{ContentExtractor, NoEmbeddings, Plugin};
use exam_dedup::{
    AnalysisHints, AnalysisInput, BatchItem, BatchOrchestrator, DedupConfig, DedupEngine, DedupError,
    ExtractedContent, FingerprintExtractor, MemoryStore,
};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "exam-dedup", version, about = "Detect duplicate exam questions in images and text")]
struct Cli {
    /// Config file (TOML, YAML or JSON). Defaults to the nearest exam-dedup.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the fingerprint of each image.
    Fingerprint {
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// OCR text to attach to every image.
        #[arg(long)]
        text: Option<String>,
    },

    /// Compare two images by exact and perceptual hash.
    Compare { a: PathBuf, b: PathBuf },

    /// Normalized-text similarity ratio of two strings.
    Similarity { text_a: String, text_b: String },

    /// Run one batch through the engine with an in-memory store.
    ///
    /// `<image>.txt` next to each image is used as its OCR text.
    Dedup {
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Worker threads (clamped to the configured bounds).
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Print the effective configuration.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    let output = match cli.command {
        Command::Fingerprint { images, text } => fingerprint(&images, text.as_deref())?,
        Command::Compare { a, b } => compare(&config, &a, &b)?,
        Command::Similarity { text_a, text_b } => similarity(&config, &text_a, &text_b),
        Command::Dedup { images, workers } => dedup(config, &images, workers)?,
        Command::Config => serde_json::to_value(&config)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<DedupConfig> {
    match path {
        Some(path) => {
            DedupConfig::from_file(path).with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => Ok(DedupConfig::discover()
            .context("Failed to load discovered config")?
            .unwrap_or_default()),
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn fingerprint(images: &[PathBuf], text: Option<&str>) -> Result<serde_json::Value> {
    let extractor = FingerprintExtractor::without_embeddings();
    let hints = text.map(AnalysisHints::with_raw_text).unwrap_or_default();

    let mut out = Vec::with_capacity(images.len());
    for path in images {
        let fp = extractor
            .extract(&AnalysisInput::image(read(path)?), &hints)
            .with_context(|| format!("Failed to fingerprint {}", path.display()))?;
        out.push(serde_json::json!({
            "path": path.display().to_string(),
            "exact_hash": fp.exact_hash,
            "perceptual_hash": fp.perceptual_hash.map(|h| h.to_hex()),
            "normalized_text": fp.normalized_text,
        }));
    }
    Ok(serde_json::Value::Array(out))
}

fn compare(config: &DedupConfig, a: &Path, b: &Path) -> Result<serde_json::Value> {
    let (bytes_a, bytes_b) = (read(a)?, read(b)?);
    let hash_a = perceptual_hash_bytes(&bytes_a).with_context(|| format!("Failed to hash {}", a.display()))?;
    let hash_b = perceptual_hash_bytes(&bytes_b).with_context(|| format!("Failed to hash {}", b.display()))?;
    let distance = hash_a.hamming(&hash_b);

    Ok(serde_json::json!({
        "exact_match": sha256_hex(&bytes_a) == sha256_hex(&bytes_b),
        "perceptual_hash_a": hash_a.to_hex(),
        "perceptual_hash_b": hash_b.to_hex(),
        "hamming_distance": distance,
        "threshold": config.matching.phash_threshold,
        "near_duplicate": distance <= config.matching.phash_threshold,
    }))
}

fn similarity(config: &DedupConfig, a: &str, b: &str) -> serde_json::Value {
    let (na, nb) = (normalize_text(a), normalize_text(b));
    let ratio = similarity_ratio(&na, &nb);
    serde_json::json!({
        "ratio": ratio,
        "threshold": config.matching.text_threshold,
        "duplicate": ratio >= config.matching.text_threshold,
    })
}

fn dedup(config: DedupConfig, images: &[PathBuf], workers: Option<usize>) -> Result<serde_json::Value> {
    let mut sidecars = SidecarExtractor::default();
    let mut items = Vec::with_capacity(images.len());

    for path in images {
        let bytes = read(path)?;
        let sidecar = sidecar_path(path);
        if sidecar.is_file() {
            let text = fs::read_to_string(&sidecar).with_context(|| format!("Failed to read {}", sidecar.display()))?;
            sidecars.insert(&bytes, text);
        } else {
            tracing::warn!(image = %path.display(), "No OCR sidecar; item will fail");
        }
        items.push(BatchItem::image(bytes));
    }

    let engine = DedupEngine::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(sidecars),
        Arc::new(NoEmbeddings),
    )?;
    let result = BatchOrchestrator::new(Arc::new(engine)).run(items, workers, None)?;
    Ok(serde_json::to_value(&result)?)
}

/// `question.png` -> `question.png.txt`
fn sidecar_path(image: &Path) -> PathBuf {
    let mut name = OsString::from(image.as_os_str());
    name.push(".txt");
    PathBuf::from(name)
}

/// Serves pre-computed OCR text keyed by image content.
#[derive(Default)]
struct SidecarExtractor {
    texts: AHashMap<String, String>,
}

impl SidecarExtractor {
    fn insert(&mut self, image_bytes: &[u8], text: String) {
        self.texts.insert(sha256_hex(image_bytes), text);
    }
}

impl Plugin for SidecarExtractor {
    fn name(&self) -> &str {
        "sidecar-text"
    }
}

impl ContentExtractor for SidecarExtractor {
    fn extract_content(&self, image_bytes: &[u8]) -> exam_dedup::Result<ExtractedContent> {
        self.texts
            .get(&sha256_hex(image_bytes))
            .map(|text| ExtractedContent::from_text(text.trim()))
            .ok_or_else(|| DedupError::extraction("No OCR sidecar for this image"))
    }
}
