//! DCT-based perceptual hash.
//!
//! The image is reduced to 32x32 grayscale, transformed with a 2D DCT-II,
//! and the top-left 8x8 block of low-frequency coefficients is compared
//! against its median. Recompression, brightness shifts and small watermarks
//! barely move low frequencies, so those copies land within a few bits of
//! each other.
//!
//! Cropping is different: every kept pixel moves relative to the 32x32 grid,
//! and the distance grows with the cropped margin. Even a 2% border crop can
//! land past the default matching threshold of 5 bits; cropped copies are
//! usually caught by the embedding or text signals instead.

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use once_cell::sync::Lazy;
use std::io::Cursor;

use crate::error::{DedupError, Result};
use crate::types::PerceptualHash;

/// Side of the downscaled grayscale image.
pub const HASH_IMG_SIZE: u32 = 32;

/// Side of the low-frequency coefficient block; `HASH_SIZE^2` bits.
pub const HASH_SIZE: usize = 8;

const N: usize = HASH_IMG_SIZE as usize;

/// `DCT_COS[k][n] = cos(pi * (2n + 1) * k / 2N)` for the first `HASH_SIZE` frequencies.
static DCT_COS: Lazy<[[f64; N]; HASH_SIZE]> = Lazy::new(|| {
    let mut table = [[0.0; N]; HASH_SIZE];
    for (k, row) in table.iter_mut().enumerate() {
        for (n, value) in row.iter_mut().enumerate() {
            *value = (std::f64::consts::PI * (2 * n + 1) as f64 * k as f64 / (2 * N) as f64).cos();
        }
    }
    table
});

/// Decode encoded image bytes, guessing the format from the content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(DedupError::extraction("Image bytes are empty"));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DedupError::extraction_with_source("Failed to read image format", e))?;

    if reader.format().is_none() {
        return Err(DedupError::extraction("Could not determine image format"));
    }

    Ok(reader.decode()?)
}

/// Perceptual hash of a decoded image.
pub fn perceptual_hash(image: &DynamicImage) -> PerceptualHash {
    let pixels = image
        .grayscale()
        .resize_exact(HASH_IMG_SIZE, HASH_IMG_SIZE, FilterType::Lanczos3)
        .to_luma8();

    let mut samples = [[0.0f64; N]; N];
    for (x, y, pixel) in pixels.enumerate_pixels() {
        samples[y as usize][x as usize] = pixel.0[0] as f64;
    }

    let coefficients = low_frequency_dct(&samples);
    let median = median(&coefficients);

    let mut bits = 0u64;
    for (i, coef) in coefficients.iter().enumerate() {
        if *coef > median {
            bits |= 1u64 << (63 - i);
        }
    }
    PerceptualHash(bits)
}

/// Decode `bytes` and hash the result.
pub fn perceptual_hash_bytes(bytes: &[u8]) -> Result<PerceptualHash> {
    let image = decode_image(bytes)?;
    Ok(perceptual_hash(&image))
}

/// Top-left `HASH_SIZE x HASH_SIZE` block of the 2D DCT-II, row-major.
fn low_frequency_dct(samples: &[[f64; N]; N]) -> [f64; HASH_SIZE * HASH_SIZE] {
    let table = &*DCT_COS;

    // Transform rows, keeping only the low horizontal frequencies.
    let mut rows = [[0.0f64; HASH_SIZE]; N];
    for (y, row) in samples.iter().enumerate() {
        for (u, cos_u) in table.iter().enumerate() {
            rows[y][u] = row.iter().zip(cos_u.iter()).map(|(s, c)| s * c).sum();
        }
    }

    let mut out = [0.0f64; HASH_SIZE * HASH_SIZE];
    for (v, cos_v) in table.iter().enumerate() {
        for u in 0..HASH_SIZE {
            out[v * HASH_SIZE + u] = rows.iter().zip(cos_v.iter()).map(|(r, c)| r[u] * c).sum();
        }
    }
    out
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
